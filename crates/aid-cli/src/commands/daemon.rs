use super::{CmdResult, EXIT_SUCCESS};
use aid_core::Engine;
use std::sync::Arc;

pub fn run(engine: Engine, port: Option<u16>) -> CmdResult {
    let mut config = engine.config().daemon.clone();
    if let Some(port) = port {
        config.port = port;
    }
    eprintln!(
        "aid daemon listening on http://{}:{} (Ctrl-C to stop)",
        config.bind, config.port
    );
    aid_server::run_server(Arc::new(engine), &config).map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}
