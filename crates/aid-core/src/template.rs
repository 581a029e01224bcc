use crate::artifacts::ArtifactError;
use std::path::Path;
use tera::{Context, Tera};

pub const DOCKERFILE_TEMPLATE: &str = "dockerfile.j2";
pub const RUNNER_TEMPLATE: &str = "runner.py.j2";

/// Built-in templates, compiled into the binary.
const EMBEDDED_TEMPLATES: &[(&str, &str)] = &[
    (DOCKERFILE_TEMPLATE, include_str!("../templates/dockerfile.j2")),
    (RUNNER_TEMPLATE, include_str!("../templates/runner.py.j2")),
];

/// Renders build artifacts from Jinja2-style templates.
pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    pub fn from_embedded() -> Result<Self, ArtifactError> {
        let mut tera = Tera::default();
        for (name, content) in EMBEDDED_TEMPLATES {
            tera.add_raw_template(name, content)
                .map_err(|source| ArtifactError::Template {
                    name: (*name).to_owned(),
                    source,
                })?;
        }
        Ok(Self { tera })
    }

    /// Embedded templates, replaced by any same-named file in `dir`.
    ///
    /// A missing `dir` is not an error. An override that exists but cannot
    /// be read or parsed is.
    pub fn with_overrides(dir: &Path) -> Result<Self, ArtifactError> {
        let mut renderer = Self::from_embedded()?;
        for (name, _) in EMBEDDED_TEMPLATES {
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            let content =
                std::fs::read_to_string(&path).map_err(|source| ArtifactError::TemplateRead {
                    path: path.clone(),
                    source,
                })?;
            renderer
                .tera
                .add_raw_template(name, &content)
                .map_err(|source| ArtifactError::Template {
                    name: (*name).to_owned(),
                    source,
                })?;
            tracing::debug!("template {name} overridden by {}", path.display());
        }
        Ok(renderer)
    }

    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, ArtifactError> {
        let mut context = Context::new();
        for (key, value) in vars {
            context.insert(*key, value);
        }
        self.tera
            .render(name, &context)
            .map_err(|source| ArtifactError::Template {
                name: name.to_owned(),
                source,
            })
    }
}
