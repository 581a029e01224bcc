use super::{CmdResult, EXIT_SUCCESS};
use aid_core::Engine;

pub fn run(engine: &Engine, id: &str) -> CmdResult {
    let log = engine.build_log(id)?;
    print!("{log}");
    if !log.ends_with('\n') {
        println!();
    }
    Ok(EXIT_SUCCESS)
}
