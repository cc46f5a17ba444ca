//! Engine configuration.
//!
//! ```yaml
//! content_type: html      # or plain
//! trim_control_lines: true
//! extension: .kiln
//! output_capacity: 4096
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use kiln_syntax::ParseOptions;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::output::ContentType;

/// Settings shared by every template in a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Escaping applied by `${...}`.
    pub content_type: ContentType,
    /// Remove lines that hold nothing but a control tag.
    pub trim_control_lines: bool,
    /// File extension used by [`DirSource::from_config`](crate::DirSource::from_config).
    pub extension: String,
    /// Initial buffer size of outputs created by the registry.
    pub output_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_type: ContentType::Html,
            trim_control_lines: true,
            extension: ".kiln".to_string(),
            output_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Reads a configuration from YAML.
    ///
    /// ```
    /// use kiln::{ContentType, EngineConfig};
    ///
    /// let config = EngineConfig::from_yaml("content_type: plain").unwrap();
    /// assert_eq!(config.content_type, ContentType::Plain);
    /// assert!(config.trim_control_lines);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_trim_control_lines(mut self, trim: bool) -> Self {
        self.trim_control_lines = trim;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            trim_control_lines: self.trim_control_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.content_type, ContentType::Html);
        assert_eq!(config.extension, ".kiln");
        assert_eq!(EngineConfig::from_yaml("").unwrap(), config);
    }

    #[test]
    fn test_full_yaml() {
        let config = EngineConfig::from_yaml(
            "content_type: plain\ntrim_control_lines: false\nextension: .tpl\noutput_capacity: 64\n",
        )
        .unwrap();
        assert_eq!(
            config,
            EngineConfig::default()
                .with_content_type(ContentType::Plain)
                .with_trim_control_lines(false)
                .with_extension(".tpl")
                .with_output_capacity(64)
        );
        assert!(!config.parse_options().trim_control_lines);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EngineConfig::from_yaml("content: html").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_bad_content_type() {
        assert!(EngineConfig::from_yaml("content_type: xml").is_err());
    }
}
