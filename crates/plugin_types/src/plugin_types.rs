//! Plugin Types - Core data structures for the plugin host
//!
//! This crate contains the pure data model shared by the plugin runtime and
//! the host application: manifests, operations, invocation input and the
//! result a plugin task produces.

mod io;
mod manifest;

pub use io::*;
pub use manifest::*;
