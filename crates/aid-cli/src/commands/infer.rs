use super::{CmdResult, EXIT_SUCCESS};
use aid_core::{parse_params, Engine};

pub fn run(engine: &Engine, uid: &str, params: &[String]) -> CmdResult {
    let params = parse_params(params)?;
    let body = engine.infer(uid, &params)?;
    println!("{body}");
    Ok(EXIT_SUCCESS)
}
