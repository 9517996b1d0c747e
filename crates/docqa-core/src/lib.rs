//! # docqa core
//!
//! Shared, I/O-free logic for docqa: data models, the chunk store trait and
//! its in-memory implementation, the similarity metric, retrieval, prompt
//! assembly, the local model catalog, the download state machine and the
//! inference backend capability.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem writes. Everything
//! that talks to the outside world lives in the `docqa` app crate.

pub mod backend;
pub mod catalog;
pub mod chunk;
pub mod download;
pub mod embedding;
pub mod models;
pub mod prompt;
pub mod search;
pub mod store;
