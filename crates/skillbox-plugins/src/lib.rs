//! Skill plugin runtime.
//!
//! Discovers, validates, runs and manages skill plugins:
//!
//! - [`SkillManifest`]: `skill.json` identity, entry point and parameter schema
//! - [`SkillRegistry`]: durable catalog of installed skills
//! - [`SkillLoader`]: in-process load, execute and reload of trusted skills
//!   built from a [`SkillCatalog`] of compiled factories
//! - [`Sandbox`]: subprocess-isolated execution with timeouts and forced cleanup
//! - [`SkillManager`]: install, uninstall and update with staging and rollback
//! - [`ProtocolAdapter`]: loaded skills as `<id>_execute` tools
//! - [`SkillRuntime`]: one owned bundle of the above per application
//!
//! # Trust model
//!
//! Skills whose exported `main` symbol is registered in the catalog run
//! in-process. Every other installed skill runs in a fresh subprocess per
//! call, confined to the allowed skill directories.
//!
//! # Features
//!
//! - `http`: remote sources (GitHub tarballs, archive URLs) and remote
//!   marketplace indexes.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod adapter;
pub mod catalog;
pub mod deps;
pub mod error;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod marketplace;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod skill;
pub mod source;
pub mod staging;
pub mod version;

pub use adapter::{ProtocolAdapter, ToolDescriptor, parse_tool_name, tool_name};
pub use catalog::{SkillCatalog, SkillFactory, SkillInit};
pub use deps::DependencyOptions;
pub use error::{SkillError, SkillResult};
pub use loader::{
    ExecutableSkill, ExecutionOutput, LoadSummary, LoadedSkill, SkillHealth, SkillLoader,
    SkillSummary,
};
pub use manager::{
    AvailableSkills, GitHubInstallOptions, InstallOptions, ManagerConfig, ManagerStatus,
    OperationReport, SkillManager, UninstallOptions, UpdateOptions,
};
pub use manifest::{MANIFEST_FILE_NAME, ParameterSchema, PropertySchema, SkillManifest};
pub use marketplace::{IndexLocation, Marketplace, MarketplaceEntry};
pub use registry::{
    ExportFormat, ListFilter, RegisterOptions, RegistryEntry, SearchOptions, SkillRegistry,
    SortKey, SortOrder,
};
pub use runtime::{Route, SkillRuntime};
pub use sandbox::{ResourceLimits, Sandbox, SandboxConfig, SandboxStats};
pub use skill::{HealthReport, LoadStatus, Skill, SkillKind};
pub use source::{DefaultFetcher, SkillSource, SourceFetcher};
pub use version::{Version, VersionReq};
