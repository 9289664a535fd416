//! Shared data model for the chat-relay gateway and worker tiers.
//!
//! This crate holds everything both binaries agree on: the job/chunk data
//! model, the wire contracts of the worker HTTP API, the OpenAI-compatible
//! request/response envelopes the gateway serves, and environment-driven
//! configuration for both tiers.

pub mod config;
pub mod job;
pub mod openai;

pub use config::{GatewayConfig, WorkerConfig};
pub use job::{Chunk, JobMeta, JobStatus};
