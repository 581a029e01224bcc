use super::{json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::{Engine, PackageRef, RemoveTarget};
use dialoguer::Confirm;
use std::io::{stderr, stdin, IsTerminal};

fn confirm(target: RemoveTarget, uid: &str, yes: bool) -> Result<(), String> {
    if yes {
        return Ok(());
    }
    let what = target.as_str();
    if !(stdin().is_terminal() && stderr().is_terminal()) {
        return Err(format!("refusing to remove {what} {uid} without --yes"));
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("remove {what} {uid}?"))
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    if confirmed {
        Ok(())
    } else {
        Err(format!("{what} {uid} kept"))
    }
}

pub fn run(engine: &Engine, kind: &str, uid: &str, yes: bool, json: bool) -> CmdResult {
    let target: RemoveTarget = kind.parse()?;
    // Unknown ids fail before the prompt.
    match target {
        RemoveTarget::Container => {
            engine.inspect_container(uid)?;
        }
        RemoveTarget::Image => {
            engine.inspect_image(uid)?;
        }
        RemoveTarget::Package => {
            let pkg: PackageRef = uid.parse()?;
            pkg.package_only()?;
            engine.installed_package_dir(&pkg)?;
        }
    }
    confirm(target, uid, yes)?;

    engine.remove(target, uid)?;
    let what = target.as_str();
    if json {
        let payload = serde_json::json!({ "removed": what, "uid": uid });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed {what} {uid}");
    }
    Ok(EXIT_SUCCESS)
}
