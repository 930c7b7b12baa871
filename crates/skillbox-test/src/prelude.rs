//! Commonly used fixtures.
//!
//! `use skillbox_test::prelude::*;`

pub use crate::fixtures::*;
pub use crate::harness::*;
pub use crate::scripts::*;
