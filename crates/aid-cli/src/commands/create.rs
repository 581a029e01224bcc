use super::{json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::Engine;

pub fn run(engine: &Engine, image: &str, port: Option<&str>, json: bool) -> CmdResult {
    let port = port.unwrap_or(&engine.config().daemon.default_container_port);
    let container = engine.create(image, port)?;
    if json {
        println!("{}", json_pretty(&container)?);
    } else {
        println!(
            "created container {} from image {} on port {}",
            container.uid, container.image, container.port
        );
    }
    Ok(EXIT_SUCCESS)
}
