//! # hookrelay
//!
//! Relay binary: loads settings, starts the bot transports and serves the
//! webhook route until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hookrelay_core::RuleIndexHandle;
use hookrelay_core::logging::init_subscriber;
use hookrelay_server::{Dispatcher, RelayServer};
use hookrelay_settings::{
    RelaySettings, load_settings_from_path, settings_path, write_sample_settings,
};
use hookrelay_transport::TransportRegistry;
use tracing::{debug, error, info, warn};

/// GitHub webhook to OneBot relay.
#[derive(Parser, Debug)]
#[command(name = "hookrelay", version, about = "GitHub webhook to OneBot relay")]
struct Cli {
    /// Settings file (default `./hookrelay.json`).
    #[arg(long, short, global = true, env = "HOOKRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the relay (default).
    Serve,
    /// Write a sample settings file.
    Init,
    /// Validate the settings file and print a summary.
    Check,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(settings_path)
    }

    /// Settings from file and env, with command-line overrides on top.
    fn load(&self) -> Result<RelaySettings> {
        let path = self.settings_path();
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cli).await,
        Command::Init => init(&cli.settings_path()),
        Command::Check => {
            print!("{}", summary(&cli.load()?));
            Ok(())
        }
    }
}

fn init(path: &Path) -> Result<()> {
    write_sample_settings(path)
        .with_context(|| format!("failed to write sample settings to {}", path.display()))?;
    println!("wrote sample settings to {}", path.display());
    Ok(())
}

/// Human-readable overview printed by `hookrelay check`.
fn summary(settings: &RelaySettings) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "listening on {}:{}{}",
        settings.server.host, settings.server.port, settings.server.webhook_path
    );
    let _ = writeln!(out, "backends: {}", settings.backends.len());
    for backend in &settings.backends {
        let _ = writeln!(out, "  {} ({}) {}", backend.name, backend.protocol, backend.url);
    }
    let _ = writeln!(out, "rules: {}", settings.rules.len());
    for rule in &settings.rules {
        let _ = writeln!(
            out,
            "  {}: {} -> {} target(s)",
            rule.name,
            rule.repos.join(", "),
            rule.targets.len()
        );
    }
    out
}

async fn serve(cli: &Cli) -> Result<()> {
    let path = cli.settings_path();
    let settings = cli.load()?;
    init_subscriber(&settings.logging.level, settings.logging.json);
    info!(
        path = %path.display(),
        backends = settings.backends.len(),
        rules = settings.rules.len(),
        "settings loaded"
    );
    if settings.rules.is_empty() {
        warn!("no rules configured, every webhook will be ignored");
    }

    let registry = Arc::new(
        TransportRegistry::from_settings(&settings.backends)
            .await
            .context("failed to register backends")?,
    );
    let failures = registry.start_all().await;
    if !failures.is_empty() {
        warn!(
            count = failures.len(),
            "some backends are unreachable, delivery will retry the connection"
        );
    }

    let dispatcher = Dispatcher::new(
        RuleIndexHandle::new(settings.rule_index()),
        Arc::clone(&registry),
    )
    .with_settings_path(&path);
    let server = Arc::new(RelayServer::new(settings.server.clone(), dispatcher));

    let listener = server.bind().await.with_context(|| {
        format!(
            "failed to bind {}:{}",
            settings.server.host, settings.server.port
        )
    })?;

    let _signals = server.shutdown().listen_for_signals();
    #[cfg(unix)]
    let _reload = reload_on_hangup(Arc::clone(&server));

    let handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "server error");
                server.shutdown().shutdown();
            }
        })
    };

    server.shutdown().cancelled().await;
    info!("shutting down");
    let drained = server.shutdown().graceful_shutdown(vec![handle], None).await;
    registry.close_all().await;

    info!(clean = drained, "shutdown complete");
    Ok(())
}

/// Re-read rules from the settings file on every SIGHUP.
#[cfg(unix)]
fn reload_on_hangup(server: Arc<RelayServer>) -> tokio::task::JoinHandle<()> {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP, rule reload disabled");
                return;
            }
        };
        loop {
            tokio::select! {
                () = server.shutdown().cancelled() => return,
                received = hangup.recv() => {
                    if received.is_none() {
                        return;
                    }
                    match server.dispatcher().reload_rules() {
                        Ok(count) => debug!(rules = count, "reload finished"),
                        Err(e) => error!(error = %e, "rule reload failed, keeping current rules"),
                    }
                }
            }
        }
    })
}
