//! Session coordinator for a live compile/run editor.
//!
//! This crate turns a stream of raw edits into staged feedback from a remote
//! compiler, and manages the lifetime of at most one interactive execution at
//! a time. It is built from small single-owner pieces wired together over
//! channels:
//!
//! - [`status::StatusBoard`]: the four-phase pipeline status machine. Every
//!   phase result goes through one transition function that forward-invalidates
//!   later phases.
//! - [`coalescer::Coalescer`]: collapses bursts of edits into at most one
//!   analysis request per quiet period.
//! - [`analysis::AnalysisClient`]: owns the persistent analysis connection,
//!   applies lexer/parser result frames, and reconnects with a bounded retry
//!   policy.
//! - [`run::RunManager`]: drives one run session from trigger to exit or
//!   cancel, and is the sole authority for opening and closing the execution
//!   channel.
//! - [`exec::ExecClient`]: the per-run duplex terminal channel.
//! - [`term::TerminalInputBuffer`]: pure keystroke-to-line assembly with local
//!   echo.
//!
//! Transports are abstracted behind [`transport::AnalysisTransport`] and
//! [`transport::ExecTransport`]; [`transport::memory`] provides in-process
//! implementations for tests.

#![warn(missing_docs)]

pub mod analysis;
pub mod coalescer;
pub mod config;
pub mod exec;
pub mod run;
pub mod status;
pub mod term;
pub mod transport;

pub use analysis::AnalysisClient;
pub use coalescer::Coalescer;
pub use config::SessionConfig;
pub use exec::{ExecClient, ExecLifecycle, TerminalSink};
pub use run::{InputCollector, PrepareService, RunManager, RunPhase};
pub use status::{Phase, PhaseStatus, Pipeline, StatusBoard, StatusKind};
pub use term::{KeyEffect, TerminalInputBuffer};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The analysis channel is not connected.
	#[error("analysis channel not connected")]
	NotConnected,
	/// The execution channel is already attached to another session.
	#[error("execution channel busy with session {0}")]
	ChannelBusy(String),
	/// The channel was closed while the attach was still dialing.
	#[error("attach superseded by a close")]
	AttachSuperseded,
	/// A run was triggered while the pipeline does not allow it.
	#[error("source is not runnable: {0}")]
	NotRunnable(String),
	/// The connection attempt exceeded its deadline.
	#[error("connection attempt timed out")]
	ConnectTimeout,
	/// The underlying transport failed.
	#[error("transport error: {0}")]
	Transport(String),
	/// A synchronous service call failed.
	#[error("service error: {0}")]
	Service(String),
	/// A frame could not be encoded or decoded.
	#[error(transparent)]
	Codec(#[from] kiln_protocol::Error),
}
