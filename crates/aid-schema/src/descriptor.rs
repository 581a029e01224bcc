use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name of the package descriptor inside a package directory.
pub const DESCRIPTOR_FILE: &str = "aid.toml";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read package descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse package descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("package.{0} must not be empty")]
    EmptyField(&'static str),
    #[error("invalid name '{0}': must match [a-zA-Z0-9._-]")]
    InvalidName(String),
    #[error("solver '{0}' is declared more than once")]
    DuplicateSolver(String),
    #[error("solver '{solver}' has malformed class '{class}', expected 'package/file/class'")]
    MalformedClass { solver: String, class: String },
}

/// Parsed `aid.toml`.
///
/// Unknown top-level tables (pretrained weights, datasets and so on) are
/// accepted and ignored; only the sections the orchestrator consumes are
/// modelled here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub package: PackageSection,
    #[serde(default)]
    pub solvers: Vec<Solver>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackageSection {
    pub name: String,
    pub vendor: String,
    #[serde(default)]
    pub tagline: Option<String>,
}

/// A solver declaration: the executable unit invoked inside a container.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Solver {
    pub name: String,
    /// `package/file/class`, slash-delimited.
    pub class: String,
}

/// The three components of a solver class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPath<'a> {
    pub package: &'a str,
    pub filename: &'a str,
    pub classname: &'a str,
}

impl Solver {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
        }
    }

    /// Split the class into exactly three non-empty components.
    pub fn class_path(&self) -> Result<ClassPath<'_>, DescriptorError> {
        let mut parts = self.class.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(package), Some(filename), Some(classname), None)
                if !package.is_empty() && !filename.is_empty() && !classname.is_empty() =>
            {
                Ok(ClassPath {
                    package,
                    filename,
                    classname,
                })
            }
            _ => Err(DescriptorError::MalformedClass {
                solver: self.name.clone(),
                class: self.class.clone(),
            }),
        }
    }
}

fn validate_name(name: &str) -> Result<(), DescriptorError> {
    if name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        Ok(())
    } else {
        Err(DescriptorError::InvalidName(name.to_owned()))
    }
}

impl PackageDescriptor {
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.package.name.trim().is_empty() {
            return Err(DescriptorError::EmptyField("name"));
        }
        if self.package.vendor.trim().is_empty() {
            return Err(DescriptorError::EmptyField("vendor"));
        }
        validate_name(&self.package.name)?;
        validate_name(&self.package.vendor)?;

        let mut seen = BTreeSet::new();
        for solver in &self.solvers {
            if solver.name.is_empty() {
                return Err(DescriptorError::EmptyField("solvers.name"));
            }
            validate_name(&solver.name)?;
            if !seen.insert(solver.name.as_str()) {
                return Err(DescriptorError::DuplicateSolver(solver.name.clone()));
            }
        }
        Ok(())
    }

    pub fn solver(&self, name: &str) -> Option<&Solver> {
        self.solvers.iter().find(|s| s.name == name)
    }

    /// Image tag and solver uid for one of this package's solvers:
    /// `<vendor>-<package>-<solver>`, lowercased.
    pub fn image_title(&self, solver_name: &str) -> String {
        format!(
            "{}-{}-{}",
            self.package.vendor, self.package.name, solver_name
        )
        .to_lowercase()
    }
}

pub fn parse_descriptor_str(input: &str) -> Result<PackageDescriptor, DescriptorError> {
    let descriptor: PackageDescriptor = toml::from_str(input)?;
    descriptor.validate()?;
    Ok(descriptor)
}

pub fn parse_descriptor_file(path: impl AsRef<Path>) -> Result<PackageDescriptor, DescriptorError> {
    let content = fs::read_to_string(path)?;
    parse_descriptor_str(&content)
}
