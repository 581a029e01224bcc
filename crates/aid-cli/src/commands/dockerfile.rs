use super::{json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::{Engine, PackageRef};
use std::path::Path;

pub fn run(engine: &Engine, reference: &str, set: Option<&Path>, json: bool) -> CmdResult {
    let pkg: PackageRef = reference.parse()?;
    pkg.solver()?;

    if let Some(source) = set {
        let content = std::fs::read_to_string(source)
            .map_err(|e| format!("failed to read {}: {e}", source.display()))?;
        let path = engine.write_dockerfile(&pkg, &content)?;
        if json {
            let payload = serde_json::json!({ "path": path.display().to_string() });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!("updated {}", path.display());
        }
        return Ok(EXIT_SUCCESS);
    }

    let content = engine.read_dockerfile(&pkg)?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "content": content }))?);
    } else {
        print!("{content}");
    }
    Ok(EXIT_SUCCESS)
}
