//! Command dispatch: resolves config + flags into a client, then hands off
//! to the per-command handlers.

pub mod availability;
pub mod call;
pub mod config_cmd;
pub mod listen;
pub mod services;
pub mod session;

use std::path::PathBuf;
use std::time::Duration;

use dconnect_config::{Config, Profile};
use dconnect_core::{
    ClientConfig, ConnectOptions, Connection, DeviceConnectClient, JsonFileStore, ScopeSet,
    TlsVerification,
};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

// ── Settings ─────────────────────────────────────────────────────────

/// Config file + active profile, before any flag overrides.
pub struct Settings {
    pub config_path: PathBuf,
    pub config: Config,
    pub profile_name: String,
    pub profile: Option<Profile>,
}

impl Settings {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config_path = global
            .config
            .clone()
            .unwrap_or_else(dconnect_config::config_path);
        let config = dconnect_config::load_config_from(&config_path)?;
        let profile_name = config.active_profile_name(global.profile.as_deref());

        // An explicitly named profile must exist; the implicit default may not.
        let profile = if global.profile.is_some() {
            Some(config.profile(&profile_name)?.clone())
        } else {
            config.profiles.get(&profile_name).cloned()
        };

        Ok(Self {
            config_path,
            config,
            profile_name,
            profile,
        })
    }

    pub fn sessions_path(global: &GlobalOpts) -> PathBuf {
        global
            .sessions_file
            .clone()
            .unwrap_or_else(dconnect_config::sessions_path)
    }

    /// Host from `--host`, else the active profile.
    pub fn host(&self, global: &GlobalOpts) -> Result<String, CliError> {
        global
            .host
            .clone()
            .or_else(|| self.profile.as_ref().map(|p| p.host.clone()))
            .ok_or_else(|| CliError::NoHost {
                path: self.config_path.display().to_string(),
            })
    }

    fn client_config(&self, global: &GlobalOpts) -> Result<ClientConfig, CliError> {
        let mut config =
            dconnect_config::client_config(&self.config.defaults, self.profile.as_ref())?;
        if let Some(secs) = global.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if global.insecure {
            config.tls = TlsVerification::DangerAcceptInvalid;
        }
        if let Some(port) = global.port {
            config.default_port = port;
        }
        if global.ssl {
            config.default_ssl = true;
        }
        Ok(config)
    }

    fn scopes(&self) -> ScopeSet {
        self.profile
            .as_ref()
            .map_or_else(ScopeSet::default_profiles, Profile::scope_set)
    }
}

// ── Context ──────────────────────────────────────────────────────────

/// Everything a manager-bound command needs.
pub struct Context {
    pub client: DeviceConnectClient,
    pub store: JsonFileStore,
    pub options: ConnectOptions,
}

impl Context {
    pub fn build(global: &GlobalOpts) -> Result<Self, CliError> {
        let settings = Settings::load(global)?;
        let host = settings.host(global)?;
        let config = settings.client_config(global)?;

        let options = ConnectOptions::new(host, settings.scopes())
            .with_port(config.default_port)
            .with_ssl(config.default_ssl);

        let client = DeviceConnectClient::new(config);
        let store = JsonFileStore::new(Settings::sessions_path(global));
        let restored = client.restore_sessions(&store)?;
        tracing::debug!(restored, path = %store.path().display(), "sessions restored");

        // A saved session for another port or scheme is stale for this run.
        if let Some(existing) = client.session(&options.host) {
            let h = existing.host();
            if Some(h.port) != options.port || Some(h.ssl) != options.ssl {
                tracing::debug!(host = %options.host, "dropping session saved for a different endpoint");
                client.delete_session(&options.host);
            }
        }

        Ok(Self {
            client,
            store,
            options,
        })
    }

    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Run the connect sequence, then persist whatever credentials resulted.
    pub async fn connect(&self) -> Result<Connection, CliError> {
        let result = self.client.connect(self.options.clone()).await;
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "could not persist sessions");
        }
        Ok(result?)
    }

    pub fn save(&self) -> Result<(), CliError> {
        Ok(self.client.save_sessions(&self.store)?)
    }
}

/// Dispatch a manager-bound command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let ctx = Context::build(global)?;
    tracing::debug!(host = ctx.host(), command = ?cmd, "dispatching command");

    match cmd {
        Command::Availability => availability::handle(&ctx, global).await,
        Command::Services(args) => services::handle(&ctx, &args, global).await,
        Command::Call(args) => call::handle(&ctx, args, global).await,
        Command::Listen(args) => listen::handle(&ctx, &args, global).await,
        Command::Session(_) | Command::Config(_) => Err(CliError::Internal(
            "local commands are handled before dispatch".into(),
        )),
    }
}
