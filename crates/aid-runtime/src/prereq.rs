use std::fmt;
use std::process::Command;

/// A missing host prerequisite with install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn daemon_reachable(binary: &str) -> bool {
    Command::new(binary)
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check that `binary` is installed and its engine answers.
/// An empty list means solvers can be built and run.
pub fn check_docker_prereqs(binary: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists(binary) {
        missing.push(MissingPrereq {
            name: binary.to_owned(),
            purpose: "building solver images and running containers",
            install_hint: "https://docs.docker.com/engine/install/ | zypper install docker | apt install docker.io | dnf install moby-engine",
        });
    } else if !daemon_reachable(binary) {
        missing.push(MissingPrereq {
            name: format!("{binary} daemon"),
            purpose: "container engine reachable by the current user",
            install_hint: "systemctl start docker, and add the user to the docker group",
        });
    }

    missing
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\naid needs a container engine to build and run solvers.");
    msg
}
