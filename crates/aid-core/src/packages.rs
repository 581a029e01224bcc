use crate::CoreError;
use aid_schema::{parse_descriptor_file, PretrainedModel, Solver, DESCRIPTOR_FILE};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const README_FILE: &str = "README.md";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Environment name that selects the variables of every environment.
pub const ALL_ENVIRONMENTS: &str = "all";

/// An installed package, as found under `<home>/models`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackageSummary {
    pub vendor: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    pub solvers: Vec<String>,
    pub path: PathBuf,
}

/// Everything a package ships besides its code.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackageMeta {
    pub vendor: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    pub solvers: Vec<Solver>,
    pub pretrained: Vec<PretrainedModel>,
    pub readme: Option<String>,
    pub requirements: Option<String>,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, CoreError> {
    let mut dirs = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                dirs.push((name.to_owned(), entry.path()));
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Every `<vendor>/<package>` under `models_dir` that has a readable
/// descriptor. Packages whose descriptor does not parse are skipped with a
/// warning.
pub fn scan_packages(models_dir: &Path) -> Result<Vec<PackageSummary>, CoreError> {
    let mut packages = Vec::new();
    for (vendor, vendor_dir) in sorted_subdirs(models_dir)? {
        for (name, path) in sorted_subdirs(&vendor_dir)? {
            let descriptor_path = path.join(DESCRIPTOR_FILE);
            if !descriptor_path.is_file() {
                continue;
            }
            match parse_descriptor_file(&descriptor_path) {
                Ok(descriptor) => packages.push(PackageSummary {
                    vendor: vendor.clone(),
                    name,
                    tagline: descriptor.package.tagline,
                    solvers: descriptor.solvers.into_iter().map(|s| s.name).collect(),
                    path,
                }),
                Err(e) => warn!("skipping package {vendor}/{name}: {e}"),
            }
        }
    }
    Ok(packages)
}

/// Contents of an optional package file, `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>, CoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn validate_environment(environment: &str) -> Result<(), CoreError> {
    let valid = !environment.is_empty()
        && environment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(format!(
            "invalid environment name '{environment}'"
        )))
    }
}

/// Variable names usable in a process environment: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_env_key(key: &str) -> Result<(), CoreError> {
    let mut bytes = key.bytes();
    let valid = matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(format!(
            "invalid environment variable name '{key}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_package(models: &Path, vendor: &str, name: &str, descriptor: &str) -> PathBuf {
        let dir = models.join(vendor).join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DESCRIPTOR_FILE), descriptor).unwrap();
        dir
    }

    #[test]
    fn scan_finds_packages_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let models = tmp.path();
        write_package(
            models,
            "aidmodels",
            "text",
            "[package]\nname = \"text\"\nvendor = \"aidmodels\"\n",
        );
        write_package(
            models,
            "aidmodels",
            "face",
            "[package]\nname = \"face\"\nvendor = \"aidmodels\"\ntagline = \"faces\"\n\
             [[solvers]]\nname = \"mtcnn\"\nclass = \"face/solver/Mtcnn\"\n",
        );
        fs::create_dir_all(models.join("aidmodels").join("no-descriptor")).unwrap();

        let found = scan_packages(models).unwrap();
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["face", "text"]);
        assert_eq!(found[0].solvers, vec!["mtcnn"]);
        assert_eq!(found[0].tagline.as_deref(), Some("faces"));
    }

    #[test]
    fn scan_skips_broken_descriptors() {
        let tmp = tempfile::tempdir().unwrap();
        write_package(tmp.path(), "v", "broken", "[package]\nname = ");
        assert!(scan_packages(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scan_packages(&tmp.path().join("models")).unwrap().is_empty());
    }

    #[test]
    fn optional_file_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_optional(&tmp.path().join(README_FILE)).unwrap(), None);
        fs::write(tmp.path().join(README_FILE), "# face\n").unwrap();
        assert_eq!(
            read_optional(&tmp.path().join(README_FILE)).unwrap().as_deref(),
            Some("# face\n")
        );
    }

    #[test]
    fn env_names_and_keys() {
        assert!(validate_environment("prod").is_ok());
        assert!(validate_environment("").is_err());
        assert!(validate_environment("../x").is_err());
        assert!(validate_env_key("MODEL_PATH").is_ok());
        assert!(validate_env_key("_x1").is_ok());
        assert!(validate_env_key("1X").is_err());
        assert!(validate_env_key("A-B").is_err());
        assert!(validate_env_key("").is_err());
    }
}
