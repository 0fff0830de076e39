//! # MnemoDB Testkit
//!
//! Test utilities for MnemoDB.
//!
//! This crate provides:
//! - Store fixtures over memory or a temporary directory
//! - A small file-system-like schema used across scenario tests
//! - Property-based generators using proptest
//! - Concurrent submission stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use mnemo_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! let schema = FileSchema::register(&store);
//! let result = store.commit(|tx| {
//!     tx.add(entity(1), schema.path, "/a");
//! });
//! assert_eq!(result.datoms, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
