use aid_core::{install_signal_handler, resolve_home, Engine};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "aid-server", version, about = "aid lifecycle daemon")]
struct Cli {
    /// aid home directory [default: $AID_HOME or ~/.aid]
    #[arg(long)]
    home: Option<PathBuf>,

    /// Port to listen on [default: daemon.port from config.toml]
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind [default: daemon.bind from config.toml]
    #[arg(long)]
    bind: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AID_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    install_signal_handler();

    let home = resolve_home(cli.home.as_deref());
    let engine = match Engine::new(home.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("cannot open aid home {}: {e}", home.display());
            return ExitCode::FAILURE;
        }
    };

    let mut daemon = engine.config().daemon.clone();
    if let Some(port) = cli.port {
        daemon.port = port;
    }
    if let Some(bind) = cli.bind {
        daemon.bind = bind;
    }
    info!("aid home: {}", home.display());
    info!("runtime: {}", engine.runtime_name());
    if !engine.runtime_available() {
        warn!(
            "container engine '{}' is not reachable; build and container requests will fail",
            engine.runtime_name()
        );
    }

    match aid_server::run_server(Arc::new(engine), &daemon) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
