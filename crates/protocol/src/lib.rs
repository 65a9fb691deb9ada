//! Wire frames and service DTOs for the kiln compile/run channels.
//!
//! Two channels share this crate:
//!
//! - the **analysis channel**: a persistent connection carrying source
//!   snapshots out and lexer/parser results back, and
//! - the **execution channel**: a per-run connection carrying stdin out and
//!   stdout/stderr/exit back.
//!
//! Every frame is a tagged JSON object (`{"type": "...", ...}`). Frames are
//! immutable values; the session layer derives state from the latest frame of
//! each kind, never from a replayed log.

#![warn(missing_docs)]

mod frame;
mod service;

pub use frame::{AnalysisFrame, AnalysisRequest, ExecClientFrame, ExecServerFrame, Token};
pub use service::{InputPrompt, PrepareOutcome, PrepareResponse, RunWithInputRequest, SemanticOutcome};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The payload is not valid JSON or does not match any known frame shape.
	#[error("malformed frame: {0}")]
	Codec(#[from] serde_json::Error),
}

/// Encode any serializable frame as a JSON text payload.
pub fn encode<T: serde::Serialize>(frame: &T) -> Result<String> {
	Ok(serde_json::to_string(frame)?)
}

/// Decode a JSON text payload into a frame type.
pub fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> Result<T> {
	Ok(serde_json::from_str(payload)?)
}
