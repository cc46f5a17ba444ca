//! Template sources.
//!
//! The registry fetches template text through [`TemplateSource`]. Names are
//! `/`-separated (`layout/page`), matching the dotted include syntax
//! `@template.layout.page(...)`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::LoadError;

/// Supplies template source text by name.
pub trait TemplateSource: Send + Sync {
    fn load(&self, name: &str) -> Result<String, LoadError>;
}

/// Templates held in memory.
///
/// ```
/// use kiln::{MemorySource, TemplateSource};
///
/// let source = MemorySource::new().with("greeting", "Hello ${name}");
/// assert_eq!(source.load("greeting").unwrap(), "Hello ${name}");
/// assert!(source.load("missing").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    templates: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateSource for MemorySource {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::not_found(name))
    }
}

/// Templates read from a directory; `a/b` maps to `<root>/a/b<extension>`.
///
/// Files are read on every [`load`](TemplateSource::load); the registry
/// caches what it parses.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
    extension: String,
}

impl DirSource {
    /// Reads `<name>.kiln` files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: EngineConfig::default().extension,
        }
    }

    /// Uses the extension configured in `config`.
    pub fn from_config(root: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self::new(root).with_extension(config.extension.clone())
    }

    /// Sets the file extension, with or without its leading dot.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        self.extension = if extension.is_empty() || extension.starts_with('.') {
            extension
        } else {
            format!(".{}", extension)
        };
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file a template name maps to.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, LoadError> {
        validate_name(name)?;
        let mut path = self.root.clone();
        for segment in name.split('/') {
            path.push(segment);
        }
        let mut file_name = path.file_name().map(|f| f.to_os_string()).unwrap_or_default();
        file_name.push(&self.extension);
        path.set_file_name(file_name);
        Ok(path)
    }
}

fn validate_name(name: &str) -> Result<(), LoadError> {
    if name.is_empty() {
        return Err(LoadError::invalid_name(name, "name is empty"));
    }
    if name.split('/').any(|segment| segment == "..") {
        return Err(LoadError::invalid_name(name, "must not contain '..'"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(LoadError::invalid_name(name, "empty path segment"));
    }
    if name.contains('\\') || name.contains(':') {
        return Err(LoadError::invalid_name(name, "only '/' separates segments"));
    }
    Ok(())
}

impl TemplateSource for DirSource {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        let path = self.path_for(name)?;
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::not_found(name),
            _ => LoadError::Io {
                name: name.to_string(),
                source,
            },
        })
    }
}
