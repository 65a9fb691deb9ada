//! Network bindings to the remote compiler.
//!
//! Implements the transport and service seams of `kiln-session` against the
//! real services: the persistent analysis channel and per-run execution
//! channels speak WebSocket ([`ws`]), the synchronous prepare and semantic
//! check calls speak HTTP ([`http`]). Everything here is plumbing; all
//! session semantics live upstream in `kiln-session`.

#![warn(missing_docs)]

pub mod http;
pub mod ws;

pub use http::HttpCompilerService;
pub use ws::{WsAnalysisTransport, WsExecTransport};
