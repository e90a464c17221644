//! YAML spec files.
//!
//! ```yaml
//! spec:
//!   - image: nginx:latest
//!     env:
//!       MODE: production
//!     ports:
//!       - hostport: "8080"
//!         containerport: "80"
//!     volumes:
//!       - /var/cache/nginx
//! ```

use std::path::Path;

use minipod_api::{Container, PodSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::validate;
use crate::error::SpecError;

/// A parsed spec file. Each container becomes one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecFile {
    pub spec: Vec<Container>,
}

impl SpecFile {
    /// Parse and validate a spec file from YAML text.
    pub fn parse(yaml: &str) -> Result<Self, SpecError> {
        let file: SpecFile = serde_yaml::from_str(yaml)?;
        if file.spec.is_empty() {
            return Err(SpecError::Empty);
        }
        for container in &file.spec {
            validate(container)?;
        }
        Ok(file)
    }

    /// Read, parse and validate a spec file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Reading spec file");
        let yaml = std::fs::read_to_string(path)?;
        Self::parse(&yaml)
    }

    /// One pod spec per container, in file order.
    pub fn pod_specs(&self) -> Vec<PodSpec> {
        self.spec
            .iter()
            .cloned()
            .map(|container| PodSpec { container })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const NGINX: &str = r#"
spec:
  - image: nginx:latest
    env:
      MODE: production
    ports:
      - hostport: "8080"
        containerport: "80"
    volumes:
      - /var/cache/nginx
  - image: redis:7
"#;

    #[test]
    fn test_parse_spec_file() {
        let file = SpecFile::parse(NGINX).unwrap();
        assert_eq!(file.spec.len(), 2);

        let nginx = &file.spec[0];
        assert_eq!(nginx.image, "nginx:latest");
        assert_eq!(nginx.env["MODE"], "production");
        assert_eq!(nginx.ports[0].hostport, "8080");
        assert_eq!(nginx.ports[0].containerport, "80");
        assert_eq!(nginx.volumes, vec!["/var/cache/nginx".to_string()]);

        let redis = &file.spec[1];
        assert!(redis.env.is_empty());
        assert!(redis.ports.is_empty());
    }

    #[test]
    fn test_pod_specs_keep_order() {
        let specs = SpecFile::parse(NGINX).unwrap().pod_specs();
        let images: Vec<_> = specs.iter().map(|s| s.container.image.as_str()).collect();
        assert_eq!(images, vec!["nginx:latest", "redis:7"]);
    }

    #[test]
    fn test_empty_spec_is_rejected() {
        assert!(matches!(SpecFile::parse("spec: []"), Err(SpecError::Empty)));
    }

    #[test]
    fn test_missing_image_is_rejected() {
        let yaml = "spec:\n  - env:\n      A: b\n";
        assert!(SpecFile::parse(yaml).is_err());

        let yaml = "spec:\n  - image: \"\"\n";
        assert!(matches!(SpecFile::parse(yaml), Err(SpecError::EmptyImage)));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            SpecFile::parse("spec: [unterminated"),
            Err(SpecError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(NGINX.as_bytes()).unwrap();

        let file = SpecFile::from_file(tmp.path()).unwrap();
        assert_eq!(file.spec.len(), 2);
    }

    #[test]
    fn test_from_missing_file() {
        let err = SpecFile::from_file("/nonexistent/minipod.yaml").unwrap_err();
        assert!(matches!(err, SpecError::Io(_)));
    }
}
