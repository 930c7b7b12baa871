//! Runtime facade.
//!
//! [`SkillRuntime`] owns one [`SkillManager`], one [`Sandbox`] and one
//! [`ProtocolAdapter`]. An application creates exactly one and passes it
//! around; nothing here is global.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use crate::adapter::ProtocolAdapter;
use crate::catalog::SkillCatalog;
use crate::error::{SkillError, SkillResult};
use crate::loader::{ExecutionOutput, LoadSummary};
use crate::manager::{ManagerConfig, SkillManager};
use crate::marketplace::Marketplace;
use crate::sandbox::{Sandbox, SandboxConfig};

/// Method invoked on sandboxed skills by [`SkillRuntime::execute`].
pub const SANDBOX_ENTRY_METHOD: &str = "execute";

/// Where a call was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The skill is loaded in-process.
    InProcess,
    /// The skill is registered and runs in a subprocess.
    Sandboxed,
}

/// Manager, sandbox and tool adapter for one application instance.
#[derive(Debug)]
pub struct SkillRuntime {
    manager: SkillManager,
    sandbox: Sandbox,
    adapter: ProtocolAdapter,
}

impl SkillRuntime {
    /// Build a runtime.
    ///
    /// The manager's skill tree is added to the sandbox's allowed
    /// directories so registered skills can always run sandboxed.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager cannot create its layout or open
    /// its registry.
    pub fn new(
        manager: ManagerConfig,
        mut sandbox: SandboxConfig,
        catalog: SkillCatalog,
    ) -> SkillResult<Self> {
        if !sandbox.allowed_dirs.contains(&manager.skills_dir) {
            sandbox.allowed_dirs.push(manager.skills_dir.clone());
        }
        let manager = SkillManager::new(manager, catalog)?;
        Ok(Self {
            manager,
            sandbox: Sandbox::new(sandbox),
            adapter: ProtocolAdapter::default(),
        })
    }

    /// Attach a marketplace to the manager.
    #[must_use]
    pub fn with_marketplace(mut self, marketplace: Marketplace) -> Self {
        self.manager = self.manager.with_marketplace(marketplace);
        self
    }

    /// Replace the protocol adapter (server name and version).
    #[must_use]
    pub fn with_adapter(mut self, adapter: ProtocolAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// The manager.
    #[must_use]
    pub fn manager(&self) -> &SkillManager {
        &self.manager
    }

    /// The manager, for install, uninstall and update.
    ///
    /// Call [`SkillRuntime::refresh_tools`] afterwards to republish tools.
    pub fn manager_mut(&mut self) -> &mut SkillManager {
        &mut self.manager
    }

    /// The sandbox.
    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// The tool adapter.
    #[must_use]
    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// Load builtin skills and publish them as tools.
    pub async fn start(&mut self) -> LoadSummary {
        let summary = self.manager.load_builtin().await;
        let tools = self.refresh_tools();
        info!(
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            tools,
            "Skill runtime started"
        );
        summary
    }

    /// Rebuild the tool list from the loaded skills.
    pub fn refresh_tools(&mut self) -> usize {
        self.adapter.register_all(self.manager.loader())
    }

    /// How a call to `id` would be routed, if at all.
    #[must_use]
    pub fn route(&self, id: &str) -> Option<Route> {
        if self.manager.loader().is_loaded(id) {
            Some(Route::InProcess)
        } else if self.manager.registry().has(id) {
            Some(Route::Sandboxed)
        } else {
            None
        }
    }

    /// Run a skill wherever it lives.
    ///
    /// Loaded skills run in-process. Registered skills that are not loaded
    /// run in the sandbox, with their parameters validated first.
    ///
    /// # Errors
    ///
    /// [`SkillError::NotFound`] for an unknown ID, otherwise the loader's or
    /// sandbox's error.
    pub async fn execute(
        &self,
        id: &str,
        params: Value,
        context: Value,
    ) -> SkillResult<ExecutionOutput> {
        match self.route(id) {
            Some(Route::InProcess) => self.manager.execute(id, params, context).await,
            Some(Route::Sandboxed) => {
                let entry = self
                    .manager
                    .registry()
                    .get(id)
                    .ok_or_else(|| SkillError::NotFound(id.to_string()))?;
                entry.manifest.validate_params(&params)?;
                debug!(skill_id = %id, path = %entry.path.display(), "Routing call to sandbox");

                let started = Instant::now();
                let result = self
                    .sandbox
                    .execute(&entry.path, SANDBOX_ENTRY_METHOD, params, context)
                    .await?;
                Ok(ExecutionOutput {
                    skill_id: id.to_string(),
                    result,
                    latency: started.elapsed(),
                })
            },
            None => Err(SkillError::NotFound(id.to_string())),
        }
    }

    /// Serve one tool-calling protocol request.
    ///
    /// # Errors
    ///
    /// See [`ProtocolAdapter::handle_request`].
    pub async fn handle_request(&self, method: &str, params: Value) -> SkillResult<Value> {
        self.adapter
            .handle_request(self.manager.loader(), method, params)
            .await
    }

    /// Kill every sandboxed call in flight and unload in-process skills.
    pub async fn shutdown(&mut self) {
        let cancelled = self.sandbox.cleanup();
        let unloaded = self.manager.shutdown().await;
        self.refresh_tools();
        info!(cancelled, unloaded, "Skill runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn runtime(root: &std::path::Path) -> SkillRuntime {
        let sandbox = SandboxConfig {
            allowed_dirs: Vec::new(),
            ..SandboxConfig::default()
        };
        SkillRuntime::new(ManagerConfig::rooted_at(root), sandbox, SkillCatalog::new()).unwrap()
    }

    #[test]
    fn skills_dir_is_allowed_in_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = runtime(tmp.path());
        assert!(
            rt.sandbox()
                .config()
                .allowed_dirs
                .contains(&tmp.path().join("skills"))
        );
    }

    #[tokio::test]
    async fn unknown_skill_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = runtime(tmp.path());
        assert_eq!(rt.route("ghost"), None);
        let err = rt.execute("ghost", json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, SkillError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_start_publishes_no_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rt = runtime(tmp.path());
        let summary = rt.start().await;
        assert!(summary.loaded.is_empty());
        assert!(rt.adapter().tools().is_empty());

        let listed = rt.handle_request("tools/list", json!({})).await.unwrap();
        assert_eq!(listed, json!({ "tools": [] }));
        rt.shutdown().await;
    }
}
