use super::{json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::{Engine, PackageRef};

pub fn run(engine: &Engine, reference: &str, json: bool) -> CmdResult {
    let pkg: PackageRef = reference.parse()?;
    let written = engine.generate(&pkg)?;
    if json {
        let paths: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
        println!("{}", json_pretty(&paths)?);
    } else {
        for path in &written {
            println!("wrote {}", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
