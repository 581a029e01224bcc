use crate::descriptor::DescriptorError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Optional file listing downloadable weights for a package.
pub const PRETRAINED_FILE: &str = "pretrained.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PretrainedList {
    #[serde(default)]
    pub models: Vec<PretrainedModel>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PretrainedModel {
    pub name: String,
    pub url: String,
}

pub fn parse_pretrained_str(input: &str) -> Result<PretrainedList, DescriptorError> {
    Ok(toml::from_str(input)?)
}

/// Read `pretrained.toml` from `package_dir`. A missing file is an empty list.
pub fn read_pretrained(package_dir: &Path) -> Result<PretrainedList, DescriptorError> {
    match fs::read_to_string(package_dir.join(PRETRAINED_FILE)) {
        Ok(content) => parse_pretrained_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PretrainedList::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_list() {
        let list = parse_pretrained_str(
            r#"
[[models]]
name = "mtcnn-default"
url = "https://example.com/mtcnn.pth"
"#,
        )
        .unwrap();
        assert_eq!(list.models.len(), 1);
        assert_eq!(list.models[0].name, "mtcnn-default");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_pretrained(dir.path()).unwrap().models.is_empty());
    }

    #[test]
    fn model_without_url_is_rejected() {
        assert!(matches!(
            parse_pretrained_str("[[models]]\nname = \"x\"\n"),
            Err(DescriptorError::ParseToml(_))
        ));
    }
}
