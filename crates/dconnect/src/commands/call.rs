//! `dconnect call <METHOD> <PATH>`

use dconnect_core::{Operation, ProfileRequest};

use crate::cli::{CallArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::Context;

pub(crate) fn build_request(
    method: dconnect_core::Method,
    path: &str,
    service_id: Option<&str>,
) -> Result<ProfileRequest, CliError> {
    let request = ProfileRequest::from_path(method, path).ok_or_else(|| CliError::Validation {
        field: "path".into(),
        reason: format!("expected profile[/interface][/attribute], got '{path}'"),
    })?;
    Ok(match service_id {
        Some(id) => request.service_id(id),
        None => request,
    })
}

pub async fn handle(ctx: &Context, args: CallArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut request = build_request(args.method, &args.path, args.service_id.as_deref())?;
    for (key, value) in args.params {
        request = request.param(key, value);
    }
    tracing::info!(request = %request, "calling profile");

    // Queued until the session is established.
    let pending = ctx.client.offer(ctx.host(), Operation::request(request));
    ctx.connect().await?;
    let value = pending.await?;
    ctx.save()?;

    let format = match global.output {
        OutputFormat::JsonCompact | OutputFormat::Plain => OutputFormat::JsonCompact,
        OutputFormat::Table | OutputFormat::Json => OutputFormat::Json,
    };
    output::print_output(&output::render_json(&value, format == OutputFormat::JsonCompact), global.quiet);
    Ok(())
}
