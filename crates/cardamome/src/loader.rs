//! Template loaders
//!
//! A loader maps the names used by `py:extends`, `py:import` and
//! `py:include` to compiled templates. Loaders cache what they compile.

use crate::compiler::CompileOptions;
use crate::doctype::Mode;
use crate::error::LoaderError;
use crate::template::Template;
use camino::{Utf8Path, Utf8PathBuf};
use miette::Result;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Resolves template names to compiled templates.
pub trait Loader: Send + Sync {
    fn load(&self, name: &str) -> Result<Arc<Template>>;

    /// The name an import binds when it has no alias: the file stem.
    fn default_alias_for(&self, name: &str) -> String {
        Utf8Path::new(name)
            .file_stem()
            .unwrap_or(name)
            .to_string()
    }
}

/// How a template's text is compiled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateKind {
    Text,
    /// Markup, with a forced mode if any
    Markup(Option<Mode>),
}

impl TemplateKind {
    /// Decide from the file extension.
    pub fn for_name(name: &str) -> Option<Self> {
        Utf8Path::new(name).extension().and_then(|ext| ext.parse().ok())
    }
}

impl FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "txt" | "text" => Ok(TemplateKind::Text),
            "xml" => Ok(TemplateKind::Markup(None)),
            "html" => Ok(TemplateKind::Markup(Some(Mode::Html))),
            "html5" => Ok(TemplateKind::Markup(Some(Mode::Html5))),
            other => Err(format!("unknown template kind: {other}")),
        }
    }
}

/// Options shared by the loaders.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Directories searched in order
    pub paths: Vec<Utf8PathBuf>,
    /// Recompile a file when it changed on disk
    pub reload: bool,
    /// Overrides the mode an extension implies
    pub force_mode: Option<Mode>,
    pub autoescape_text: bool,
    pub autoblocks: Vec<String>,
    pub cdata_scripts: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            paths: vec![Utf8PathBuf::from(".")],
            reload: false,
            force_mode: None,
            autoescape_text: false,
            autoblocks: Vec::new(),
            cdata_scripts: true,
        }
    }
}

impl LoaderOptions {
    /// Compile `text` as the template `name`, picking the kind from its
    /// extension.
    pub fn compile(&self, name: &str, text: String) -> Result<Template> {
        let kind = TemplateKind::for_name(name).ok_or_else(|| LoaderError::UnknownExtension {
            name: name.to_string(),
        })?;
        match kind {
            TemplateKind::Text => Template::from_text(name, text, self.autoescape_text),
            TemplateKind::Markup(mode) => {
                let options = CompileOptions {
                    mode: self.force_mode.or(mode),
                    fragment: false,
                    autoblocks: self.autoblocks.clone(),
                    cdata_scripts: self.cdata_scripts,
                };
                Template::from_markup(name, text, &options)
            }
        }
    }
}

/// Templates held in memory, keyed by name.
#[derive(Default)]
pub struct MemoryLoader {
    options: LoaderOptions,
    sources: Mutex<HashMap<String, String>>,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoaderOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Register (or replace) a template source.
    pub fn add(&self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&name);
        }
        if let Ok(mut sources) = self.sources.lock() {
            sources.insert(name, text.into());
        }
    }

    /// Builder form of [`MemoryLoader::add`].
    pub fn with(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(name, text);
        self
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = self.cache.lock().ok().and_then(|c| c.get(name).cloned()) {
            tracing::debug!(name, "template cache hit");
            return Ok(template);
        }
        let text = self
            .sources
            .lock()
            .ok()
            .and_then(|s| s.get(name).cloned())
            .ok_or_else(|| LoaderError::NotFound {
                name: name.to_string(),
                paths: Vec::new(),
            })?;
        let template = Arc::new(self.options.compile(name, text)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), template.clone());
        }
        Ok(template)
    }
}

struct Cached {
    template: Arc<Template>,
    modified: Option<std::time::SystemTime>,
}

/// Templates read from a list of directories.
pub struct FileLoader {
    options: LoaderOptions,
    cache: Mutex<HashMap<String, Cached>>,
}

impl FileLoader {
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            options,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    fn resolve(&self, name: &str) -> Result<Utf8PathBuf> {
        let relative = Utf8Path::new(name.trim_start_matches('/'));
        self.options
            .paths
            .iter()
            .map(|dir| dir.join(relative))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                LoaderError::NotFound {
                    name: name.to_string(),
                    paths: self.options.paths.iter().map(|p| p.to_string()).collect(),
                }
                .into()
            })
    }
}

fn modified(path: &Utf8Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl Loader for FileLoader {
    fn load(&self, name: &str) -> Result<Arc<Template>> {
        let path = self.resolve(name)?;
        let stamp = modified(&path);
        if let Some(cached) = self.cache.lock().ok().and_then(|c| {
            c.get(name)
                .filter(|cached| !self.options.reload || cached.modified == stamp)
                .map(|cached| cached.template.clone())
        }) {
            tracing::debug!(name, "template cache hit");
            return Ok(cached);
        }

        tracing::debug!(%path, "loading template");
        let text = std::fs::read_to_string(&path).map_err(|source| LoaderError::Io {
            path: path.to_string(),
            source,
        })?;
        let template = Arc::new(self.options.compile(name, text)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                name.to_string(),
                Cached {
                    template: template.clone(),
                    modified: stamp,
                },
            );
        }
        Ok(template)
    }
}

/// A loader with no templates, for renders that never load any.
pub struct NullLoader;

impl Loader for NullLoader {
    fn load(&self, name: &str) -> Result<Arc<Template>> {
        Err(LoaderError::NotFound {
            name: name.to_string(),
            paths: Vec::new(),
        }
        .into())
    }
}
