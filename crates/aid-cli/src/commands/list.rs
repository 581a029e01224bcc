use super::{colorize_running, json_pretty, CmdResult, EXIT_SUCCESS};
use aid_core::Engine;

pub fn run(engine: &Engine, kind: &str, json: bool) -> CmdResult {
    match kind {
        "image" | "images" => {
            let images = engine.list_images()?;
            if json {
                println!("{}", json_pretty(&images)?);
            } else if images.is_empty() {
                println!("no images found");
            } else {
                println!("{:<12} {:<36} CREATED", "UID", "TITLE");
                for image in &images {
                    println!(
                        "{:<12} {:<36} {}",
                        image.uid,
                        image.title,
                        image.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        "container" | "containers" => {
            let containers = engine.list_containers()?;
            if json {
                println!("{}", json_pretty(&containers)?);
            } else if containers.is_empty() {
                println!("no containers found");
            } else {
                println!("{:<12} {:<12} {:<8} STATE", "UID", "IMAGE", "PORT");
                for c in &containers {
                    println!(
                        "{:<12} {:<12} {:<8} {}",
                        c.uid,
                        c.image,
                        c.port,
                        colorize_running(c.running)
                    );
                }
            }
        }
        "solver" | "solvers" => {
            let solvers = engine.list_solvers()?;
            if json {
                println!("{}", json_pretty(&solvers)?);
            } else if solvers.is_empty() {
                println!("no solvers found");
            } else {
                println!("{:<16} {:<24} {:<16} CLASS", "VENDOR", "PACKAGE", "NAME");
                for s in &solvers {
                    println!(
                        "{:<16} {:<24} {:<16} {}",
                        s.vendor, s.package, s.name, s.class
                    );
                }
            }
        }
        "package" | "packages" => {
            let packages = engine.list_packages()?;
            if json {
                println!("{}", json_pretty(&packages)?);
            } else if packages.is_empty() {
                println!("no packages installed");
            } else {
                println!("{:<16} {:<24} {:<24} TAGLINE", "VENDOR", "PACKAGE", "SOLVERS");
                for p in &packages {
                    println!(
                        "{:<16} {:<24} {:<24} {}",
                        p.vendor,
                        p.name,
                        p.solvers.join(","),
                        p.tagline.as_deref().unwrap_or("")
                    );
                }
            }
        }
        other => {
            return Err(format!(
                "unknown kind '{other}', expected images, containers, solvers or packages"
            )
            .into())
        }
    }
    Ok(EXIT_SUCCESS)
}
