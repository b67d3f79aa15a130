//! `dconnect listen <PATH> --service-id ID`
//!
//! Registers an event listener, prints events as they arrive, and
//! unregisters on Ctrl-C or after `--count` events. Stops early if the
//! manager drops the socket and no reconnection monitor is configured.

use dconnect_core::{DeviceEvent, Method, SessionState};

use crate::cli::{GlobalOpts, ListenArgs, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::Context;
use super::call::build_request;

fn render_event(format: OutputFormat, event: &DeviceEvent) -> String {
    match format {
        OutputFormat::Table => format!(
            "{} [{}] {}",
            event.channel_path(),
            event.service_id.as_deref().unwrap_or("-"),
            output::render_json(&event.extra, true)
        ),
        OutputFormat::Json => output::render_json(event, false),
        OutputFormat::JsonCompact | OutputFormat::Plain => output::render_json(event, true),
    }
}

pub async fn handle(ctx: &Context, args: &ListenArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let request = build_request(Method::PUT, &args.path, Some(&args.service_id))?;
    let connection = ctx.connect().await?;
    let session = connection.session;

    let mut subscription = session.add_event_listener(&request).await?;
    tracing::info!(key = subscription.key(), "listening; press Ctrl-C to stop");

    let monitored = ctx.client.config().monitor_interval.is_some();
    let mut state = session.subscribe_state();
    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = async { state.changed().await.map(|()| *state.borrow_and_update()) } => {
                match changed {
                    Ok(SessionState::Disconnected) if monitored => {
                        tracing::warn!("event channel dropped, waiting for reconnect");
                    }
                    Ok(SessionState::Disconnected) | Err(_) => {
                        tracing::warn!("event channel closed by the manager");
                        break;
                    }
                    Ok(SessionState::Established) => tracing::info!("event channel re-established"),
                    Ok(SessionState::Connecting) => {}
                }
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                output::print_output(&render_event(global.output, &event), global.quiet);
                received += 1;
                if args.count.is_some_and(|n| received >= n) {
                    break;
                }
            }
        }
    }

    if let Err(e) = session.remove_event_listener(&request).await {
        tracing::warn!(error = %e, "could not unregister event listener");
    }
    session.disconnect();
    ctx.save()?;
    Ok(())
}
