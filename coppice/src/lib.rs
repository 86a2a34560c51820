//! Top-level wiring for a `coppice` client: a [`coppice_db::Database`]
//! opened against a repository endpoint, handing out [`coppice_session::Session`]s
//! whose objects are plain [`coppice_model::ObjectRef`]s.
//!
//! This crate has no logic of its own -- it exists so `src/bin.rs` (and any
//! application embedding this stack) has one place to import instead of
//! reaching into every component crate directly.

pub use coppice_db::{Config, Database};
pub use coppice_model::{NodeKind, ObjectRef};
pub use coppice_session::Session;
