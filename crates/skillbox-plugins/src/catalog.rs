//! Compiled catalog of in-process skill factories.
//!
//! In-process skills are linked into the host binary. Each registers a
//! factory under the symbol name its manifest exports (`main`). The loader
//! resolves that symbol on every load, so replacing a factory and reloading
//! the skill picks up the new code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::error::SkillResult;
use crate::manifest::SkillManifest;
use crate::skill::Skill;

/// Everything a factory receives when the loader instantiates a skill.
#[derive(Debug, Clone)]
pub struct SkillInit {
    /// The validated manifest.
    pub manifest: SkillManifest,
    /// Parsed `config.json`, or an empty object.
    pub config: Value,
    /// The skill's directory.
    pub root: PathBuf,
}

/// Constructs skill instances.
pub trait SkillFactory: Send + Sync {
    /// Create a new, not yet initialized instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable.
    fn create(&self, init: SkillInit) -> SkillResult<Box<dyn Skill>>;
}

impl<F> SkillFactory for F
where
    F: Fn(SkillInit) -> SkillResult<Box<dyn Skill>> + Send + Sync,
{
    fn create(&self, init: SkillInit) -> SkillResult<Box<dyn Skill>> {
        self(init)
    }
}

/// Shared symbol table of skill factories.
///
/// Cloning is cheap and every clone sees the same table.
#[derive(Clone, Default)]
pub struct SkillCatalog {
    factories: Arc<RwLock<HashMap<String, Arc<dyn SkillFactory>>>>,
}

impl SkillCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an exported symbol, replacing any previous one.
    pub fn register(&self, symbol: impl Into<String>, factory: impl SkillFactory + 'static) {
        let symbol = symbol.into();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if factories.insert(symbol.clone(), Arc::new(factory)).is_some() {
            debug!(symbol = %symbol, "Replaced skill factory");
        } else {
            debug!(symbol = %symbol, "Registered skill factory");
        }
    }

    /// Remove a factory. Returns whether it existed.
    pub fn unregister(&self, symbol: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(symbol)
            .is_some()
    }

    /// Look up the factory for a symbol.
    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<Arc<dyn SkillFactory>> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    /// Registered symbol names, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        symbols.sort();
        symbols
    }
}

impl std::fmt::Debug for SkillCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillCatalog")
            .field("symbols", &self.symbols())
            .finish()
    }
}
