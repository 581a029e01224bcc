use super::{json_pretty, with_spinner, CmdResult, EXIT_SUCCESS};
use aid_core::{Engine, PackageRef};

pub fn run(engine: &Engine, reference: &str, rebuild: bool, json: bool) -> CmdResult {
    let pkg: PackageRef = reference.parse()?;
    pkg.solver()?;

    let result = with_spinner(json, &format!("building {pkg}..."), "image built", || {
        engine.build(&pkg, rebuild)
    })?;

    if json {
        let payload = serde_json::json!({
            "image": result.image,
            "logid": result.log_id,
            "reused": result.reused,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let verb = if result.reused { "reused" } else { "built" };
        println!("{verb} image {} ({})", result.image.uid, result.image.title);
        println!("build log: {}", result.log_id);
    }
    Ok(EXIT_SUCCESS)
}
