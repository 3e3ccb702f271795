//! # context-embed core
//!
//! Shared, runtime-agnostic logic for context-embed: data models, the error
//! taxonomy, the embedding backend trait, the vector store abstraction, and
//! the similarity ranking algorithm.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Concrete providers and stores live in the `context-embed` app crate.

pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{ErrorKind, PipelineError, ProviderError, ProviderErrorKind};
