use super::{json_pretty, with_spinner, CmdResult, EXIT_SUCCESS};
use aid_core::Engine;

pub fn run(engine: &Engine, uid: &str, json: bool) -> CmdResult {
    let container = with_spinner(json, &format!("starting {uid}..."), "started", || {
        engine.start(uid)
    })?;
    if json {
        println!("{}", json_pretty(&container)?);
    } else {
        println!(
            "started container {} (port {})",
            container.uid, container.port
        );
    }
    Ok(EXIT_SUCCESS)
}
