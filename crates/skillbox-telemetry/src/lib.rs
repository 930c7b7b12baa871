//! Logging and request correlation for the skillbox runtime.
//!
//! - [`LogConfig`] / [`setup_logging`]: one global `tracing` subscriber,
//!   pretty, compact or JSON, to stderr, stdout or a daily-rotated file
//! - [`RequestContext`] / [`RequestGuard`]: correlation IDs and spans for
//!   one operation and its sub-operations
//!
//! `RUST_LOG`, when set, replaces the configured level.
//!
//! # Example
//!
//! ```rust,no_run
//! use skillbox_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), skillbox_telemetry::TelemetryError> {
//! setup_logging(
//!     &LogConfig::new("info")
//!         .with_format(LogFormat::Compact)
//!         .with_directive("skillbox_plugins=debug"),
//! )?;
//!
//! let ctx = RequestContext::new("cli")
//!     .with_operation("install")
//!     .with_skill("weather");
//! let _span = ctx.span().entered();
//! tracing::info!("Installing");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
