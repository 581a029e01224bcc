use crate::template::{TemplateRenderer, DOCKERFILE_TEMPLATE, RUNNER_TEMPLATE};
use aid_schema::{DescriptorError, PackageDescriptor, Solver};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Substituted when a snippet file is absent or has no commands.
pub const NO_SNIPPET: &str = "echo There is no command for extra installation";
/// Substituted when a snippet file exists but cannot be read.
pub const UNREADABLE_SNIPPET: &str = "echo An error occurred parsing setup file";

pub const SETUP_SNIPPET: &str = "setup.sh";
pub const PREPIP_SNIPPET: &str = "prepip.sh";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("template '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },
    #[error("cannot read template {}: {source}", path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn dockerfile_name(solver_name: &str) -> String {
    format!("docker_{solver_name}")
}

pub fn runner_name(solver_name: &str) -> String {
    format!("runner_{solver_name}.py")
}

/// Join the non-empty lines of a shell snippet into one `&&` chain.
/// Returns `None` if there is nothing to run.
pub fn join_snippet(contents: &str) -> Option<String> {
    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" && "))
    }
}

/// The command a snippet file contributes to a Dockerfile.
///
/// Never fails: an unreadable file degrades to [`UNREADABLE_SNIPPET`].
pub fn read_snippet(path: &Path) -> String {
    if !path.exists() {
        return NO_SNIPPET.to_owned();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => join_snippet(&contents).unwrap_or_else(|| NO_SNIPPET.to_owned()),
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            UNREADABLE_SNIPPET.to_owned()
        }
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    let wrap = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(wrap)?;
    tmp.write_all(contents.as_bytes()).map_err(wrap)?;
    tmp.as_file().sync_all().map_err(wrap)?;
    tmp.persist(path).map_err(|e| wrap(e.error))?;
    Ok(())
}

/// Writes the Dockerfile and runner script for solvers of a package.
pub struct ArtifactGenerator {
    renderer: TemplateRenderer,
}

impl ArtifactGenerator {
    pub fn new(renderer: TemplateRenderer) -> Self {
        Self { renderer }
    }

    /// Render `docker_<solver_name>` into `package_dir`, overwriting.
    pub fn generate_dockerfile(
        &self,
        solver_name: &str,
        package_dir: &Path,
    ) -> Result<PathBuf, ArtifactError> {
        let setup = read_snippet(&package_dir.join(SETUP_SNIPPET));
        let prepip = read_snippet(&package_dir.join(PREPIP_SNIPPET));
        let rendered = self.renderer.render(
            DOCKERFILE_TEMPLATE,
            &[
                ("solver_name", solver_name),
                ("setup", &setup),
                ("prepip", &prepip),
            ],
        )?;

        let path = package_dir.join(dockerfile_name(solver_name));
        write_atomic(&path, &rendered)?;
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// Render `runner_<solver>.py` into `package_dir`, overwriting.
    ///
    /// A malformed class is reported before anything is written.
    pub fn generate_runner(
        &self,
        solver: &Solver,
        package_dir: &Path,
    ) -> Result<PathBuf, crate::CoreError> {
        let class = solver.class_path()?;
        let rendered = self.renderer.render(
            RUNNER_TEMPLATE,
            &[
                ("package", class.package),
                ("filename", class.filename),
                ("classname", class.classname),
            ],
        )?;

        let path = package_dir.join(runner_name(&solver.name));
        write_atomic(&path, &rendered)?;
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// Regenerate every solver's runner and Dockerfile.
    ///
    /// All classes are checked first, so a malformed descriptor leaves the
    /// package directory untouched.
    pub fn generate_all(
        &self,
        descriptor: &PackageDescriptor,
        package_dir: &Path,
    ) -> Result<Vec<PathBuf>, crate::CoreError> {
        check_classes(descriptor)?;
        let mut written = Vec::with_capacity(descriptor.solvers.len() * 2);
        for solver in &descriptor.solvers {
            written.push(self.generate_runner(solver, package_dir)?);
            written.push(self.generate_dockerfile(&solver.name, package_dir)?);
        }
        Ok(written)
    }

    /// Regenerate every solver's runner without touching Dockerfiles.
    pub fn generate_runners(
        &self,
        descriptor: &PackageDescriptor,
        package_dir: &Path,
    ) -> Result<Vec<PathBuf>, crate::CoreError> {
        check_classes(descriptor)?;
        descriptor
            .solvers
            .iter()
            .map(|solver| self.generate_runner(solver, package_dir))
            .collect()
    }
}

fn check_classes(descriptor: &PackageDescriptor) -> Result<(), DescriptorError> {
    for solver in &descriptor.solvers {
        solver.class_path()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aid_schema::parse_descriptor_str;

    fn generator() -> ArtifactGenerator {
        ArtifactGenerator::new(TemplateRenderer::from_embedded().unwrap())
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn snippet_lines_are_joined() {
        assert_eq!(
            join_snippet("apt-get update\napt-get install -y x\n").as_deref(),
            Some("apt-get update && apt-get install -y x")
        );
    }

    #[test]
    fn snippet_skips_blank_lines_and_trailing_whitespace() {
        assert_eq!(
            join_snippet("pip install -U pip  \r\n\n   \nmake\r\n").as_deref(),
            Some("pip install -U pip && make")
        );
    }

    #[test]
    fn empty_snippet_has_no_command() {
        assert_eq!(join_snippet(""), None);
        assert_eq!(join_snippet("\n  \n"), None);
    }

    #[test]
    fn absent_snippet_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_snippet(&dir.path().join(SETUP_SNIPPET)), NO_SNIPPET);
    }

    #[test]
    fn blank_snippet_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETUP_SNIPPET);
        std::fs::write(&path, "\n\n").unwrap();
        assert_eq!(read_snippet(&path), NO_SNIPPET);
    }

    #[test]
    fn unreadable_snippet_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let path = dir.path().join(SETUP_SNIPPET);
        std::fs::create_dir(&path).unwrap();
        assert_eq!(read_snippet(&path), UNREADABLE_SNIPPET);
    }

    #[test]
    fn dockerfile_embeds_snippets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETUP_SNIPPET),
            "apt-get update\napt-get install -y x\n",
        )
        .unwrap();

        let path = generator()
            .generate_dockerfile("mtcnn", dir.path())
            .unwrap();
        assert_eq!(path, dir.path().join("docker_mtcnn"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("RUN apt-get update && apt-get install -y x"));
        assert!(content.contains(&format!("RUN {NO_SNIPPET}")));
    }

    #[test]
    fn generation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator();
        let solver = Solver::new("mtcnn", "face/solver/MtcnnSolver");

        let docker = gen.generate_dockerfile("mtcnn", dir.path()).unwrap();
        let runner = gen.generate_runner(&solver, dir.path()).unwrap();
        let first = (
            std::fs::read(&docker).unwrap(),
            std::fs::read(&runner).unwrap(),
        );

        gen.generate_dockerfile("mtcnn", dir.path()).unwrap();
        gen.generate_runner(&solver, dir.path()).unwrap();
        assert_eq!(first.0, std::fs::read(&docker).unwrap());
        assert_eq!(first.1, std::fs::read(&runner).unwrap());
    }

    #[test]
    fn runner_is_named_after_solver() {
        let dir = tempfile::tempdir().unwrap();
        let path = generator()
            .generate_runner(&Solver::new("mtcnn", "face/solver/MtcnnSolver"), dir.path())
            .unwrap();
        assert_eq!(path, dir.path().join("runner_mtcnn.py"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("from face.solver import MtcnnSolver"));
    }

    #[test]
    fn malformed_class_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let err = generator()
            .generate_runner(&Solver::new("bad", "pkgonly"), dir.path())
            .unwrap_err();
        assert!(matches!(err, crate::CoreError::MalformedDescriptor(_)));
        assert_eq!(file_count(dir.path()), 0);
    }

    #[test]
    fn generate_all_checks_every_class_first() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_descriptor_str(
            r#"
[package]
name = "face"
vendor = "aidmodels"

[[solvers]]
name = "good"
class = "face/solver/Good"

[[solvers]]
name = "bad"
class = "face/Bad"
"#,
        )
        .unwrap();
        assert!(generator().generate_all(&descriptor, dir.path()).is_err());
        assert_eq!(file_count(dir.path()), 0);
    }

    #[test]
    fn generate_all_writes_two_files_per_solver() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_descriptor_str(
            r#"
[package]
name = "face"
vendor = "aidmodels"

[[solvers]]
name = "mtcnn"
class = "face/solver/Mtcnn"

[[solvers]]
name = "retina"
class = "face/solver/Retina"
"#,
        )
        .unwrap();
        let written = generator().generate_all(&descriptor, dir.path()).unwrap();
        assert_eq!(written.len(), 4);
        for name in ["docker_mtcnn", "runner_mtcnn.py", "docker_retina", "runner_retina.py"] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = generator()
            .generate_dockerfile("mtcnn", &dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Write { .. }));
    }
}
