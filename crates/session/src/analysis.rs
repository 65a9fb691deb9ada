//! Analysis channel client.
//!
//! Owns the one persistent connection used for lexical/syntax feedback. A
//! spawned pump task applies inbound frames to the [`StatusBoard`] in receipt
//! order and keeps the latest token list. On transport loss the pump retries
//! with a fixed delay up to a bounded number of attempts, then stays
//! disconnected until [`AnalysisClient::connect`] is called again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_protocol::{AnalysisFrame, AnalysisRequest, Token};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::status::{Phase, PhaseStatus, StatusBoard};
use crate::transport::{AnalysisEvent, AnalysisTransport};
use crate::{Error, Result};

/// Client for the persistent analysis connection.
pub struct AnalysisClient {
	transport: Arc<dyn AnalysisTransport>,
	board: Arc<StatusBoard>,
	config: SessionConfig,
	requests: Mutex<Option<mpsc::Sender<AnalysisRequest>>>,
	pump: Mutex<Option<JoinHandle<()>>>,
	tokens: RwLock<Vec<Token>>,
	generation: AtomicU64,
}

impl AnalysisClient {
	/// Create a disconnected client.
	pub fn new(
		transport: Arc<dyn AnalysisTransport>,
		board: Arc<StatusBoard>,
		config: SessionConfig,
	) -> Arc<Self> {
		Arc::new(Self {
			transport,
			board,
			config,
			requests: Mutex::new(None),
			pump: Mutex::new(None),
			tokens: RwLock::new(Vec::new()),
			generation: AtomicU64::new(0),
		})
	}

	/// Establish the connection, replacing any existing one.
	pub async fn connect(self: &Arc<Self>) -> Result<()> {
		self.disconnect();
		let conn = self.transport.connect().await?;
		*self.requests.lock() = Some(conn.requests);
		let client = self.clone();
		let handle = tokio::spawn(client.pump(conn.events));
		*self.pump.lock() = Some(handle);
		Ok(())
	}

	/// Release the connection and stop the pump.
	pub fn disconnect(&self) {
		self.requests.lock().take();
		if let Some(handle) = self.pump.lock().take() {
			handle.abort();
		}
	}

	/// Whether a connection is currently held.
	pub fn is_connected(&self) -> bool {
		self.requests
			.lock()
			.as_ref()
			.is_some_and(|tx| !tx.is_closed())
	}

	/// Latest token list from the lexical phase.
	pub fn tokens(&self) -> Vec<Token> {
		self.tokens.read().clone()
	}

	/// Allocate the next edit generation. Called once per sent request.
	pub fn next_generation(&self) -> u64 {
		self.generation.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Queue one analysis request on the connection.
	pub fn send_request(&self, request: AnalysisRequest) -> Result<()> {
		let guard = self.requests.lock();
		let Some(tx) = guard.as_ref() else {
			return Err(Error::NotConnected);
		};
		tx.try_send(request).map_err(|err| match err {
			mpsc::error::TrySendError::Closed(_) => Error::NotConnected,
			mpsc::error::TrySendError::Full(_) => Error::Transport("analysis queue full".into()),
		})
	}

	async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<AnalysisEvent>) {
		loop {
			let reason = loop {
				match events.recv().await {
					Some(AnalysisEvent::Frame(frame)) => self.on_frame(frame),
					Some(AnalysisEvent::Closed { reason }) => break reason,
					None => break None,
				}
			};
			self.requests.lock().take();
			warn!(reason = reason.as_deref().unwrap_or("peer closed"), "analysis connection lost");
			self.board.apply(
				Phase::Lexical,
				PhaseStatus::error(match &reason {
					Some(reason) => format!("Analysis connection lost: {reason}"),
					None => "Analysis connection lost".to_string(),
				}),
			);
			match self.reconnect().await {
				Some(next) => events = next,
				None => return,
			}
		}
	}

	/// Fixed-delay retry loop. Returns the new event stream, or `None` once
	/// the attempt cap is reached.
	async fn reconnect(&self) -> Option<mpsc::Receiver<AnalysisEvent>> {
		for attempt in 1..=self.config.reconnect_attempts {
			tokio::time::sleep(self.config.reconnect_delay()).await;
			match self.transport.connect().await {
				Ok(conn) => {
					debug!(attempt, "analysis connection re-established");
					*self.requests.lock() = Some(conn.requests);
					self.board
						.apply(Phase::Lexical, PhaseStatus::info("Reconnected"));
					return Some(conn.events);
				}
				Err(err) => {
					warn!(attempt, error = %err, "analysis reconnect failed");
				}
			}
		}
		self.board.apply(
			Phase::Lexical,
			PhaseStatus::error(format!(
				"Analysis service unreachable after {} attempts",
				self.config.reconnect_attempts
			)),
		);
		None
	}

	fn on_frame(&self, frame: AnalysisFrame) {
		match frame {
			AnalysisFrame::LexerResult {
				tokens,
				success,
				errors,
				generation,
			} => {
				if self.is_stale(generation) {
					return;
				}
				*self.tokens.write() = tokens;
				let status = if success {
					PhaseStatus::success("Lexical analysis passed")
				} else {
					PhaseStatus::error(errors.join("\n"))
				};
				self.board.apply(Phase::Lexical, status);
			}
			AnalysisFrame::ParserResult {
				syntax_valid,
				errors,
				generation,
				..
			} => {
				if self.is_stale(generation) {
					return;
				}
				let status = if syntax_valid {
					PhaseStatus::success("Syntax is valid")
				} else {
					PhaseStatus::error(errors.join("\n"))
				};
				self.board.apply(Phase::Syntax, status);
				self.board.set_syntax_valid(syntax_valid);
			}
			AnalysisFrame::Error { message } => {
				warn!(message = %message, "analysis service error frame");
				self.board.apply(
					Phase::Lexical,
					PhaseStatus::error(format!("Analysis service error: {message}")),
				);
			}
		}
	}

	/// A result for an older edit generation must not overwrite a newer one.
	/// Frames without a generation echo are applied as-is.
	fn is_stale(&self, generation: Option<u64>) -> bool {
		let Some(generation) = generation else {
			return false;
		};
		let latest = self.generation.load(Ordering::SeqCst);
		if generation < latest {
			debug!(generation, latest, "discarding stale analysis result");
			true
		} else {
			false
		}
	}
}

impl Drop for AnalysisClient {
	fn drop(&mut self) {
		if let Some(handle) = self.pump.lock().take() {
			handle.abort();
		}
	}
}
