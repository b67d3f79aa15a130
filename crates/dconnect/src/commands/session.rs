//! `dconnect session list|logout`
//!
//! Works on the session file only; never contacts a manager.

use serde::Serialize;
use tabled::Tabled;

use dconnect_core::store::{load_sessions, save_sessions};
use dconnect_core::{JsonFileStore, PersistedSession};

use crate::cli::{GlobalOpts, SessionArgs, SessionCommand};
use crate::error::CliError;
use crate::output;

use super::Settings;

#[derive(Debug, Clone, Serialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "SSL")]
    ssl: bool,
    #[tabled(rename = "Token")]
    access_token: String,
    #[tabled(rename = "Scopes")]
    scopes: usize,
}

impl From<&PersistedSession> for SessionView {
    fn from(p: &PersistedSession) -> Self {
        Self {
            host: p.host.clone(),
            port: p.port,
            ssl: p.ssl,
            access_token: p.access_token.as_deref().map_or_else(|| "-".into(), output::mask),
            scopes: p.scopes.len(),
        }
    }
}

pub fn handle(args: &SessionArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let store = JsonFileStore::new(Settings::sessions_path(global));
    let sessions = load_sessions(&store)?;

    match args.command {
        SessionCommand::List => {
            let views: Vec<SessionView> = sessions.iter().map(SessionView::from).collect();
            let out =
                output::render_list(global.output, &views, Clone::clone, |v| v.host.clone());
            output::print_output(&out, global.quiet);
            Ok(())
        }

        SessionCommand::Logout { all: true, .. } => {
            save_sessions(&store, &[])?;
            if !global.quiet {
                eprintln!("Forgot {} session(s)", sessions.len());
            }
            Ok(())
        }

        SessionCommand::Logout { ref host, all: false } => {
            let host = match host {
                Some(h) => h.clone(),
                None => Settings::load(global)?.host(global)?,
            };
            let before = sessions.len();
            let kept: Vec<PersistedSession> =
                sessions.into_iter().filter(|s| s.host != host).collect();
            if kept.len() == before {
                return Err(CliError::SessionNotFound { host });
            }
            save_sessions(&store, &kept)?;
            if !global.quiet {
                eprintln!("Forgot session for {host}");
            }
            Ok(())
        }
    }
}
