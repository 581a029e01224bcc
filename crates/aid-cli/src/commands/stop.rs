use super::{json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::Engine;

pub fn run(engine: &Engine, uid: &str, json: bool) -> CmdResult {
    let container = engine.stop(uid)?;
    if json {
        println!("{}", json_pretty(&container)?);
    } else {
        println!("stopped container {}", container.uid);
    }
    Ok(EXIT_SUCCESS)
}
