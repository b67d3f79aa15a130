//! `dconnect availability`

use serde::Serialize;

use dconnect_core::{HostConfig, ScopeSet, Session};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::Context;

#[derive(Debug, Serialize)]
struct Availability {
    host: String,
    url: String,
    version: Option<String>,
    name: Option<String>,
}

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let config = ctx.client.config();
    let host = HostConfig::new(ctx.host())
        .with_port(ctx.options.port.unwrap_or(config.default_port))
        .with_ssl(ctx.options.ssl.unwrap_or(config.default_ssl));

    // A bare session gives us a configured REST client without authorizing.
    let session = Session::new(host.clone(), ScopeSet::new(), config)?;
    let availability = session
        .rest()
        .availability()
        .await
        .map_err(dconnect_core::CoreError::from)?;

    let result = Availability {
        host: host.to_string(),
        url: host.base_url(),
        version: availability.version,
        name: availability.name,
    };

    let out = output::render_single(
        global.output,
        &result,
        |p| {
            let version = p.version.as_deref().unwrap_or("unknown");
            match p.name {
                Some(ref name) => format!("{name} is running at {} (version {version})", p.url),
                None => format!("Device Connect Manager is running at {} (version {version})", p.url),
            }
        },
        |p| p.host.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
