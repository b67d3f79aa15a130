//! `dconnect services`

use tabled::Tabled;

use dconnect_core::Service;

use crate::cli::{GlobalOpts, ServicesArgs};
use crate::error::CliError;
use crate::output;

use super::Context;

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    service_type: String,
    #[tabled(rename = "Online")]
    online: String,
}

fn row(s: &Service) -> ServiceRow {
    ServiceRow {
        id: s.id.clone(),
        name: s.name.clone(),
        service_type: s.service_type.clone().unwrap_or_default(),
        online: match s.online {
            Some(true) => "yes".into(),
            Some(false) => "no".into(),
            None => "-".into(),
        },
    }
}

pub async fn handle(ctx: &Context, args: &ServicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let connection = ctx.connect().await?;

    let services = match args.profile_filter {
        Some(ref profile) => connection.session.services_supporting(profile).await?,
        None => connection.services,
    };

    let out = output::render_list(global.output, &services, row, |s| s.id.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
