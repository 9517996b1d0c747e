//! Inference backends.
//!
//! [`LocalBackend`] drives an on-device model through a [`LocalRuntime`]
//! (in production, [`LlamaServerRuntime`]); [`RemoteBackend`] calls the
//! Gemini `generateContent` API. Both implement
//! [`InferenceBackend`](docqa_core::backend::InferenceBackend); which one
//! answers a query is decided by the model manager.

pub mod llama_server;
pub mod local;
pub mod remote;

pub use llama_server::LlamaServerRuntime;
pub use local::{Increments, LocalBackend, LocalRuntime};
pub use remote::RemoteBackend;
