use super::{colorize_running, json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::{Engine, PackageRef};

pub fn run(engine: &Engine, kind: &str, uid: &str, json: bool) -> CmdResult {
    match kind {
        "container" | "containers" => {
            let c = engine.inspect_container(uid)?;
            if json {
                println!("{}", json_pretty(&c)?);
            } else {
                println!("uid:         {}", c.uid);
                println!("image:       {}", c.image);
                println!("port:        {}", c.port);
                println!("state:       {}", colorize_running(c.running));
                println!("created_at:  {}", c.created_at.to_rfc3339());
            }
        }
        "image" | "images" => {
            let image = engine.inspect_image(uid)?;
            if json {
                println!("{}", json_pretty(&image)?);
            } else {
                println!("uid:         {}", image.uid);
                println!("title:       {}", image.title);
                println!("solver:      {}", image.solver);
                println!(
                    "build_log:   {}",
                    image.build_log.as_deref().unwrap_or("(none)")
                );
                println!("created_at:  {}", image.created_at.to_rfc3339());
            }
        }
        "package" | "packages" => {
            let pkg: PackageRef = uid.parse()?;
            let meta = engine.package_meta(&pkg)?;
            if json {
                println!("{}", json_pretty(&meta)?);
            } else {
                println!("package:     {}/{}", meta.vendor, meta.name);
                if let Some(tagline) = &meta.tagline {
                    println!("tagline:     {tagline}");
                }
                for solver in &meta.solvers {
                    println!("solver:      {} ({})", solver.name, solver.class);
                }
                for model in &meta.pretrained {
                    println!("pretrained:  {} {}", model.name, model.url);
                }
                if let Some(requirements) = &meta.requirements {
                    println!("requirements:");
                    for line in requirements.lines().filter(|l| !l.trim().is_empty()) {
                        println!("  {line}");
                    }
                }
                if let Some(readme) = &meta.readme {
                    println!();
                    print!("{readme}");
                }
            }
        }
        other => {
            return Err(format!(
                "cannot inspect '{other}', expected container, image or package"
            )
            .into())
        }
    }
    Ok(EXIT_SUCCESS)
}
