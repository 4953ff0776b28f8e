//! paramex-wire: Schema, Protocol and Transport for the Parameter Explorer
//!
//! This crate defines everything that crosses the boundary between the
//! exploration engine and the explorer server (remote learners and record
//! storage).
//!
//! ## Layer 0 - Wire/Persistence
//!
//! Focus: exact JSON shapes, status handling, and a faithful in-memory fake.
//!
//! ## Key Components
//!
//! - `schema`: parameter projections, samples, persisted records, scores
//! - `protocol`: endpoints, request/response payloads, status decoding
//! - `Transport` / `HttpTransport`: one JSON request per call
//! - `ExplorerClient`: typed calls for every endpoint
//! - `fakes::MemoryBackend`: in-memory server for tests

pub mod client;
mod error;
pub mod fakes;
pub mod protocol;
pub mod schema;
pub mod transport;

pub use client::ExplorerClient;
pub use error::WireError;
pub use protocol::Endpoint;
pub use schema::{
    flatten_numeric, schema_digest, ImageRecord, Metadata, ParamValue, ParameterKind,
    ParameterProjection, ParametersDef, Sample, Score, RESERVED_SAMPLE_KEYS, UNSCORED_SENTINEL,
};
pub use transport::{HttpTransport, RemoteConfig, Transport, DEFAULT_SERVER_URL};

/// Result type for wire operations
pub type WireResult<T> = std::result::Result<T, WireError>;
