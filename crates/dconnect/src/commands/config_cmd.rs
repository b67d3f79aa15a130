//! Config subcommand handlers.

use std::fmt::Write as _;

use serde::Serialize;

use dconnect_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::Settings;

/// Format config for display, masking the anti-spoofing key.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let d = &cfg.defaults;
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", d.output);
    let _ = writeln!(out, "application_name = \"{}\"", d.application_name);
    let _ = writeln!(out, "origin = \"{}\"", d.origin);
    let _ = writeln!(out, "timeout = {}", d.timeout);
    if let Some(secs) = d.handshake_timeout {
        let _ = writeln!(out, "handshake_timeout = {secs}");
    }
    let _ = writeln!(out, "monitor_interval_ms = {}", d.monitor_interval_ms);
    let _ = writeln!(out, "max_reauthorizations = {}", d.max_reauthorizations);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "host = \"{}\"", p.host);
        if let Some(port) = p.port {
            let _ = writeln!(out, "port = {port}");
        }
        let _ = writeln!(out, "ssl = {}", p.ssl);
        if !p.scopes.is_empty() {
            let quoted: Vec<String> = p.scopes.iter().map(|s| format!("\"{s}\"")).collect();
            let _ = writeln!(out, "scopes = [{}]", quoted.join(", "));
        }
        if let Some(ref origin) = p.origin {
            let _ = writeln!(out, "origin = \"{origin}\"");
        }
        if let Some(ref origin) = p.extended_origin {
            let _ = writeln!(out, "extended_origin = \"{origin}\"");
        }
        if p.hmac_key.is_some() {
            let _ = writeln!(out, "hmac_key = \"****\"");
        }
        if let Some(ref env) = p.hmac_key_env {
            let _ = writeln!(out, "hmac_key_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
    }

    out
}

#[derive(Serialize)]
struct Paths {
    config: String,
    sessions: String,
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let paths = Paths {
                config: global
                    .config
                    .clone()
                    .unwrap_or_else(dconnect_config::config_path)
                    .display()
                    .to_string(),
                sessions: Settings::sessions_path(global).display().to_string(),
            };
            let out = output::render_single(
                global.output,
                &paths,
                |p| format!("config:   {}\nsessions: {}", p.config, p.sessions),
                |p| p.config.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let settings = Settings::load(global)?;
            let mut cfg = settings.config;
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => format_config_redacted(&cfg),
                OutputFormat::Json | OutputFormat::JsonCompact => {
                    for profile in cfg.profiles.values_mut() {
                        if profile.hmac_key.is_some() {
                            profile.hmac_key = Some("****".into());
                        }
                    }
                    output::render_json(&cfg, global.output == OutputFormat::JsonCompact)
                }
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
