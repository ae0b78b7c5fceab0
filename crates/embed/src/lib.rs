//! Embedding gateway for the pubvec pipeline.
//!
//! Wraps the external embedding model behind a provider-agnostic trait:
//! a batch of UTF-8 strings in, a batch of fixed-dimension `f32` vectors
//! out, order preserved. Providers:
//!
//! - **trigram**: deterministic character-trigram embeddings, local and
//!   offline (default, also used in tests)
//! - **ollama**: neural embeddings via Ollama's local HTTP API

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
pub use providers::{OllamaProvider, TrigramProvider};
