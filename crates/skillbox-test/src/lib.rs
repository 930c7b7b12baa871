//! Shared test utilities for the skillbox runtime.
//!
//! Fixtures here write skill directories and sandbox scripts to disk as
//! plain files, so they carry no dependency on the runtime crates.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! skillbox-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use skillbox_test::prelude::*;
//!
//! #[tokio::test]
//! async fn loads_echo() {
//!     let ctx = TestContext::new();
//!     let dir = ManifestBuilder::new("echo")
//!         .main("Echo")
//!         .required_param("text", "string")
//!         .write_to(&ctx.path().join("skills/custom"));
//!     // ... load `dir`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod scripts;

pub use fixtures::*;
pub use harness::*;
pub use scripts::*;
