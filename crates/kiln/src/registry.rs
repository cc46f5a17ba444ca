//! Template registry.
//!
//! [`Registry`] owns the path from template name to executable program:
//! load the source, parse, bind against the type oracle, generate code for
//! the requested [`OutputMode`], then publish the result under a
//! [`TemplateKey`]. Every later request for that key gets the same
//! `Arc<CompiledTemplate>`.
//!
//! # Concurrency
//!
//! Each key owns a `OnceCell`. The map lock is held only long enough to
//! fetch or insert that cell; compilation runs outside it, so compiling one
//! template never blocks requests for another. Concurrent requests for the
//! same key wait on the cell and reuse the single result. A failed
//! compilation leaves the cell empty and the next request tries again.
//!
//! Parsed templates are cached the same way, per name, so that checking an
//! include against its target's parameters does not reparse the target.
//!
//! # Includes
//!
//! Compiled templates hold a weak handle back to the registry and resolve
//! include targets the first time an include executes. A template may
//! therefore include itself.
//!
//! # Example
//!
//! ```
//! use kiln::{MemorySource, OutputMode, Registry};
//! use serde_json::json;
//!
//! let source = MemorySource::new()
//!     .with("greeting", "@param string name\nHello ${name}!")
//!     .with("page", "@param string user\n<p>@template.greeting(user)</p>");
//! let registry = Registry::new(source);
//!
//! let html = registry.render_text("page", &json!({ "user": "Ada & co" })).unwrap();
//! assert_eq!(html, "<p>Hello Ada &amp; co!</p>");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::compile::{
    bind, generate_linked, schema_of, CompiledTemplate, IncludeResolver, SchemaLookup, Template,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::loader::TemplateSource;
use crate::oracle::{TypeOracle, TypeRegistry};
use crate::output::{Output, OutputMode, RenderedOutput};
use crate::types::ParameterSchema;
use crate::value::Model;

/// Identifies one compiled program: a template name in one output mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub name: String,
    pub mode: OutputMode,
}

impl TemplateKey {
    pub fn new(name: impl Into<String>, mode: OutputMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mode)
    }
}

type Cells<K, T> = Mutex<HashMap<K, Arc<OnceCell<Arc<T>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fetches the cell for `key`, creating it if absent.
fn cell<K: Eq + Hash + Clone, T>(cells: &Cells<K, T>, key: &K) -> Arc<OnceCell<Arc<T>>> {
    let mut cells = lock(cells);
    match cells.get(key) {
        Some(cell) => Arc::clone(cell),
        None => {
            let cell = Arc::new(OnceCell::new());
            cells.insert(key.clone(), Arc::clone(&cell));
            cell
        }
    }
}

struct Inner {
    me: Weak<Inner>,
    source: Arc<dyn TemplateSource>,
    oracle: Arc<dyn TypeOracle>,
    config: EngineConfig,
    parsed: Cells<String, Template>,
    compiled: Cells<TemplateKey, CompiledTemplate>,
    compiles: AtomicUsize,
}

impl Inner {
    fn build(
        source: Arc<dyn TemplateSource>,
        oracle: Arc<dyn TypeOracle>,
        config: EngineConfig,
    ) -> Arc<Inner> {
        Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            source,
            oracle,
            config,
            parsed: Mutex::new(HashMap::new()),
            compiled: Mutex::new(HashMap::new()),
            compiles: AtomicUsize::new(0),
        })
    }

    fn template(&self, name: &str) -> Result<Arc<Template>> {
        cell(&self.parsed, &name.to_string())
            .get_or_try_init(|| {
                let source = self.source.load(name)?;
                Template::parse(name, source, &self.config.parse_options()).map(Arc::new)
            })
            .cloned()
    }

    fn get_or_compile_with<F>(&self, key: &TemplateKey, supplier: F) -> Result<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> Result<CompiledTemplate>,
    {
        cell(&self.compiled, key)
            .get_or_try_init(|| {
                let compiled = supplier().map_err(|err| {
                    warn!(template = %key.name, mode = %key.mode, error = %err, "compilation failed");
                    err
                })?;
                self.compiles.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(compiled))
            })
            .cloned()
    }

    fn compile(&self, key: &TemplateKey) -> Result<CompiledTemplate> {
        let started = Instant::now();
        debug!(template = %key.name, mode = %key.mode, "compiling template");

        let template = self.template(&key.name)?;
        let bound = bind(&template, self.oracle.as_ref(), self).map_err(|errors| Error::Type {
            template: key.name.clone(),
            errors,
        })?;
        let resolver: Weak<dyn IncludeResolver> = self.me.clone();
        let compiled =
            generate_linked(&bound, key.mode, resolver).map_err(|source| Error::Compile {
                template: key.name.clone(),
                source,
            })?;

        debug!(
            template = %key.name,
            mode = %key.mode,
            ops = compiled.op_count(),
            elapsed = ?started.elapsed(),
            "compiled template"
        );
        Ok(compiled)
    }

    fn get_or_compile(&self, key: &TemplateKey) -> Result<Arc<CompiledTemplate>> {
        self.get_or_compile_with(key, || self.compile(key))
    }
}

impl SchemaLookup for Inner {
    fn schema(&self, name: &str) -> Option<ParameterSchema> {
        let template = self.template(name).ok()?;
        schema_of(&template, self.oracle.as_ref()).ok()
    }
}

impl IncludeResolver for Inner {
    fn resolve(&self, name: &str, mode: OutputMode) -> Result<Arc<CompiledTemplate>> {
        self.get_or_compile(&TemplateKey::new(name, mode))
    }
}

/// Compiles templates on demand and caches them per [`TemplateKey`].
///
/// Cloning is cheap; clones share caches.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// A registry over `source` with no record types and default settings.
    pub fn new(source: impl TemplateSource + 'static) -> Self {
        Self {
            inner: Inner::build(
                Arc::new(source),
                Arc::new(TypeRegistry::new()),
                EngineConfig::default(),
            ),
        }
    }

    /// Replaces the type oracle. Caches start empty.
    pub fn with_oracle(self, oracle: impl TypeOracle + 'static) -> Self {
        Self {
            inner: Inner::build(
                Arc::clone(&self.inner.source),
                Arc::new(oracle),
                self.inner.config.clone(),
            ),
        }
    }

    /// Replaces the configuration. Caches start empty.
    pub fn with_config(self, config: EngineConfig) -> Self {
        Self {
            inner: Inner::build(
                Arc::clone(&self.inner.source),
                Arc::clone(&self.inner.oracle),
                config,
            ),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The compiled program for `key`, compiling it on first request.
    pub fn get_or_compile(&self, key: &TemplateKey) -> Result<Arc<CompiledTemplate>> {
        self.inner.get_or_compile(key)
    }

    /// Like [`get_or_compile`](Self::get_or_compile), with a caller-supplied
    /// compile step.
    ///
    /// `supplier` runs at most once per key at a time; while it runs, other
    /// requests for `key` wait and then share its result. If it fails,
    /// nothing is published and the error goes to this caller only.
    pub fn get_or_compile_with<F>(&self, key: &TemplateKey, supplier: F) -> Result<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> Result<CompiledTemplate>,
    {
        self.inner.get_or_compile_with(key, supplier)
    }

    /// Whether `key` has a published program.
    pub fn is_compiled(&self, key: &TemplateKey) -> bool {
        lock(&self.inner.compiled)
            .get(key)
            .is_some_and(|cell| cell.get().is_some())
    }

    /// Number of programs successfully compiled by this registry.
    pub fn compile_count(&self) -> usize {
        self.inner.compiles.load(Ordering::SeqCst)
    }

    /// The parsed form of `name`.
    pub fn template(&self, name: &str) -> Result<Arc<Template>> {
        self.inner.template(name)
    }

    /// The parameters declared by `name`.
    pub fn schema(&self, name: &str) -> Result<ParameterSchema> {
        let template = self.inner.template(name)?;
        schema_of(&template, self.inner.oracle.as_ref()).map_err(|errors| Error::Type {
            template: name.to_string(),
            errors,
        })
    }

    /// Renders `name` into a fresh output of `mode`.
    pub fn render(&self, name: &str, mode: OutputMode, model: &dyn Model) -> Result<RenderedOutput> {
        let template = self.get_or_compile(&TemplateKey::new(name, mode))?;
        let mut out = RenderedOutput::new(
            mode,
            self.inner.config.content_type,
            self.inner.config.output_capacity,
        );
        template.render(model, &mut out)?;
        Ok(out)
    }

    /// Renders `name` into `out`, using the program compiled for
    /// `out.mode()`.
    pub fn render_into(&self, name: &str, out: &mut dyn Output, model: &dyn Model) -> Result<()> {
        let template = self.get_or_compile(&TemplateKey::new(name, out.mode()))?;
        template.render(model, out)?;
        Ok(())
    }

    pub fn render_text(&self, name: &str, model: &dyn Model) -> Result<String> {
        Ok(self.render(name, OutputMode::Text, model)?.into_string())
    }

    pub fn render_bytes(&self, name: &str, model: &dyn Model) -> Result<Vec<u8>> {
        Ok(self.render(name, OutputMode::Bytes, model)?.into_bytes())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("compiled", &self.compile_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LoadError, RenderError};
    use crate::loader::MemorySource;
    use serde_json::json;

    #[test]
    fn test_compiles_once_per_key() {
        let registry = Registry::new(MemorySource::new().with("a", "x"));
        let text = TemplateKey::new("a", OutputMode::Text);
        let first = registry.get_or_compile(&text).unwrap();
        let second = registry.get_or_compile(&text).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.compile_count(), 1);

        registry
            .get_or_compile(&TemplateKey::new("a", OutputMode::Bytes))
            .unwrap();
        assert_eq!(registry.compile_count(), 2);
        assert!(registry.is_compiled(&text));
    }

    #[test]
    fn test_failure_publishes_nothing() {
        let registry = Registry::new(MemorySource::new());
        let key = TemplateKey::new("late", OutputMode::Text);
        let err = registry.get_or_compile(&key).unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::NotFound { .. })));
        assert!(!registry.is_compiled(&key));

        let compiled = registry
            .get_or_compile_with(&key, || crate::compile::compile_str("ok", OutputMode::Text))
            .unwrap();
        assert_eq!(compiled.op_count(), 1);
        assert_eq!(registry.compile_count(), 1);
    }

    #[test]
    fn test_render_modes_agree() {
        let registry = Registry::new(
            MemorySource::new().with("t", "@param string s\n<b>${s}</b> $unsafe{s}"),
        );
        let model = json!({ "s": "<i>é</i>" });
        let text = registry.render_text("t", &model).unwrap();
        let bytes = registry.render_bytes("t", &model).unwrap();
        assert_eq!(text, "<b>&lt;i&gt;é&lt;/i&gt;</b> <i>é</i>");
        assert_eq!(String::from_utf8(bytes).unwrap(), text);
    }

    #[test]
    fn test_include_errors_are_wrapped() {
        let registry = Registry::new(
            MemorySource::new()
                .with("outer", "@param int n\n[@template.inner(n)]")
                .with("inner", "@param int n\n${10 / n}"),
        );
        let err = registry.render_text("outer", &json!({ "n": 0 })).unwrap_err();
        let Error::Render(RenderError::Include { template, source }) = err else {
            panic!("expected an include error");
        };
        assert_eq!(template, "inner");
        assert_eq!(*source, RenderError::DivisionByZero);
    }

    #[test]
    fn test_include_of_broken_template_is_a_type_error() {
        let registry = Registry::new(
            MemorySource::new()
                .with("outer", "@template.inner()")
                .with("inner", "@param Ghost g\n"),
        );
        let err = registry.render_text("outer", &json!({})).unwrap_err();
        assert!(matches!(err, Error::Type { .. }));
    }

    #[test]
    fn test_with_config_resets_caches() {
        let registry = Registry::new(MemorySource::new().with("a", "x"));
        registry.render_text("a", &json!({})).unwrap();
        let registry = registry.with_config(EngineConfig::default().with_output_capacity(8));
        assert_eq!(registry.compile_count(), 0);
        assert_eq!(registry.config().output_capacity, 8);
    }

    #[test]
    fn test_registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<Registry>();
    }
}
