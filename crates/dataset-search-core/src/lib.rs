//! # Dataset Search Core
//!
//! Pure logic for Dataset Search: catalogue data model, typed errors,
//! grouping of chunk-level hits into per-document results, hybrid query
//! parameters, the results-session store and the query pipeline that ties
//! them together.
//!
//! This crate contains no filesystem, HTTP or database code. External
//! collaborators (the vector store and the language model) are reached
//! through the [`pipeline::Retriever`] and [`explain::Generator`] traits.

pub mod error;
pub mod explain;
pub mod grouping;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod session;
pub mod store;

pub use error::{Error, Result};
