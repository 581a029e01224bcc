use crate::client::{BuildOutput, BuildRequest, RuntimeClient, CONTAINER_PORT};
use crate::RuntimeError;
use std::process::{Command, Output};
use tracing::{debug, info};

/// Runtime client driving the `docker` command-line tool.
///
/// Works with any binary that speaks the Docker CLI (`docker`, `podman`,
/// `nerdctl`).
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: "docker".to_owned(),
        }
    }
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn exec(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!("exec: {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RuntimeError::Unavailable(self.binary.clone())
                } else {
                    RuntimeError::Io(e)
                }
            })
    }

    /// Run a command and return its trimmed stdout, failing on non-zero exit.
    fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        let output = self.exec(args)?;
        if !output.status.success() {
            return Err(self.failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn failure(&self, args: &[String], output: &Output) -> RuntimeError {
        let status = output
            .status
            .code()
            .map_or_else(|| "killed by signal".to_owned(), |c| format!("exit code {c}"));
        RuntimeError::CommandFailed {
            command: format!("{} {}", self.binary, args.first().map_or("", String::as_str)),
            status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_owned()).collect()
}

pub fn build_args(request: &BuildRequest) -> Vec<String> {
    vec![
        "build".to_owned(),
        "-t".to_owned(),
        request.tag.clone(),
        "-f".to_owned(),
        request.dockerfile.to_string_lossy().into_owned(),
        request.context.to_string_lossy().into_owned(),
    ]
}

pub fn create_args(image_ref: &str, host_port: &str) -> Vec<String> {
    vec![
        "create".to_owned(),
        "-t".to_owned(),
        "--expose".to_owned(),
        CONTAINER_PORT.to_owned(),
        "-p".to_owned(),
        format!("0.0.0.0:{host_port}:{CONTAINER_PORT}"),
        image_ref.to_owned(),
    ]
}

impl RuntimeClient for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        self.run(&owned(&["version", "--format", "{{.Server.Version}}"]))
            .is_ok()
    }

    fn build_image(&self, request: &BuildRequest) -> Result<BuildOutput, RuntimeError> {
        info!("building image {} from {}", request.tag, request.dockerfile.display());
        let args = build_args(request);
        let output = self.exec(&args)?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }

        let image_id = self.run(&owned(&[
            "image",
            "inspect",
            "--format",
            "{{.Id}}",
            &request.tag,
        ]))?;
        if image_id.is_empty() {
            return Err(RuntimeError::InvalidOutput(format!(
                "no image id reported for {}",
                request.tag
            )));
        }
        Ok(BuildOutput { image_id, log })
    }

    fn create_container(&self, image_ref: &str, host_port: &str) -> Result<String, RuntimeError> {
        let id = self.run(&create_args(image_ref, host_port))?;
        // `docker create` may print pull progress before the id.
        id.lines()
            .last()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| RuntimeError::InvalidOutput("empty container id".to_owned()))
    }

    fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&owned(&["start", id])).map(drop)
    }

    fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&owned(&["stop", id])).map(drop)
    }

    fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&owned(&["rm", id])).map(drop)
    }

    fn remove_image(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&owned(&["rmi", id])).map(drop)
    }
}
