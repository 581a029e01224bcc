use super::{json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::{parse_params, Engine, PackageRef, ALL_ENVIRONMENTS};

pub fn run(
    engine: &Engine,
    reference: &str,
    environment: Option<&str>,
    set: &[String],
    unset: &[String],
    json: bool,
) -> CmdResult {
    let pkg: PackageRef = reference.parse()?;

    if set.is_empty() && unset.is_empty() {
        let vars = engine.env_vars(&pkg, environment.unwrap_or(ALL_ENVIRONMENTS))?;
        if json {
            println!("{}", json_pretty(&vars)?);
        } else if vars.is_empty() {
            println!("no environment variables set for {pkg}");
        } else {
            println!("{:<12} {:<24} VALUE", "ENV", "KEY");
            for v in &vars {
                println!("{:<12} {:<24} {}", v.environment, v.key, v.value);
            }
        }
        return Ok(EXIT_SUCCESS);
    }

    let environment = environment
        .ok_or_else(|| "--env is required with --set or --unset".to_owned())?;
    let mut changed = Vec::new();
    for (key, value) in parse_params(set)? {
        changed.push(engine.set_env_var(&pkg, environment, &key, &value)?);
    }
    for key in unset {
        engine.unset_env_var(&pkg, environment, key)?;
    }
    if json {
        let payload = serde_json::json!({ "set": changed, "unset": unset });
        println!("{}", json_pretty(&payload)?);
    } else {
        for var in &changed {
            println!("set {}={} in {environment}", var.key, var.value);
        }
        for key in unset {
            println!("unset {key} in {environment}");
        }
    }
    Ok(EXIT_SUCCESS)
}
