//! Debounced request coalescer.
//!
//! Converts a high-frequency edit stream into at most one analysis send per
//! quiet period. A newer edit supersedes a pending one; it never queues behind
//! it. Intermediate edits are lost by design, only the final text matters.

use std::sync::Arc;

use kiln_protocol::AnalysisRequest;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::analysis::AnalysisClient;
use crate::config::SessionConfig;
use crate::status::{Phase, PhaseStatus, StatusBoard};

/// Debounced, single-flight edit submitter.
pub struct Coalescer {
	client: Arc<AnalysisClient>,
	board: Arc<StatusBoard>,
	config: SessionConfig,
	pending: Mutex<Option<JoinHandle<()>>>,
}

impl Coalescer {
	/// Create a coalescer feeding the given analysis client.
	pub fn new(
		client: Arc<AnalysisClient>,
		board: Arc<StatusBoard>,
		config: SessionConfig,
	) -> Self {
		Self {
			client,
			board,
			config,
			pending: Mutex::new(None),
		}
	}

	/// Submit the current source text.
	///
	/// Marks the Lexical phase running immediately so the UI reflects latency,
	/// then (re)starts the quiet-period timer. When the timer fires the last
	/// submitted text is sent; if the channel is down at that point the
	/// request is dropped and a transport error is surfaced instead.
	pub fn submit(&self, source: impl Into<String>) {
		let source = source.into();
		self.board
			.apply(Phase::Lexical, PhaseStatus::running("Analyzing…"));

		let client = self.client.clone();
		let board = self.board.clone();
		let quiet = self.config.debounce();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(quiet).await;
			let request = AnalysisRequest {
				code: source,
				generation: client.next_generation(),
			};
			debug!(generation = request.generation, "sending analysis request");
			if let Err(err) = client.send_request(request) {
				warn!(error = %err, "dropping analysis request");
				board.apply(
					Phase::Lexical,
					PhaseStatus::error("Analysis service unavailable"),
				);
			}
		});

		if let Some(previous) = self.pending.lock().replace(handle) {
			previous.abort();
		}
	}

	/// Drop any pending, unsent request.
	pub fn cancel_pending(&self) {
		if let Some(handle) = self.pending.lock().take() {
			handle.abort();
		}
	}
}

impl Drop for Coalescer {
	fn drop(&mut self) {
		self.cancel_pending();
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::status::StatusKind;
	use crate::transport::memory::MemoryAnalysisTransport;

	#[tokio::test(start_paused = true)]
	async fn burst_of_edits_yields_one_send_with_last_text() {
		let (transport, mut accept) = MemoryAnalysisTransport::new();
		let board = StatusBoard::new();
		let client = AnalysisClient::new(transport, board.clone(), SessionConfig::default());
		client.connect().await.unwrap();
		let mut peer = accept.recv().await.unwrap();
		let coalescer = Coalescer::new(client, board.clone(), SessionConfig::default());

		coalescer.submit("first");
		tokio::time::sleep(Duration::from_millis(100)).await;
		coalescer.submit("second");
		tokio::time::sleep(Duration::from_millis(100)).await;
		coalescer.submit("final text");

		let sent = peer.requests.recv().await.unwrap();
		assert_eq!(sent.code, "final text");
		assert!(
			peer.requests.try_recv().is_err(),
			"superseded edits must not be sent"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn submit_marks_lexical_running_before_the_timer_fires() {
		let (transport, mut accept) = MemoryAnalysisTransport::new();
		let board = StatusBoard::new();
		let client = AnalysisClient::new(transport, board.clone(), SessionConfig::default());
		client.connect().await.unwrap();
		let _peer = accept.recv().await.unwrap();
		let coalescer = Coalescer::new(client, board.clone(), SessionConfig::default());

		coalescer.submit("text");
		assert_eq!(
			board.snapshot().phase(Phase::Lexical).kind,
			StatusKind::Running
		);
	}

	#[tokio::test(start_paused = true)]
	async fn disconnected_channel_surfaces_a_transport_error() {
		let (transport, _accept) = MemoryAnalysisTransport::new();
		let board = StatusBoard::new();
		let client = AnalysisClient::new(transport, board.clone(), SessionConfig::default());
		// Never connected.
		let coalescer = Coalescer::new(client, board.clone(), SessionConfig::default());

		coalescer.submit("text");
		tokio::time::sleep(Duration::from_secs(1)).await;
		let status = board.snapshot().phase(Phase::Lexical).clone();
		assert_eq!(status.kind, StatusKind::Error);
		assert_eq!(status.message.as_deref(), Some("Analysis service unavailable"));
	}

	#[tokio::test(start_paused = true)]
	async fn sends_are_in_edit_order_across_quiet_windows() {
		let (transport, mut accept) = MemoryAnalysisTransport::new();
		let board = StatusBoard::new();
		let client = AnalysisClient::new(transport, board.clone(), SessionConfig::default());
		client.connect().await.unwrap();
		let mut peer = accept.recv().await.unwrap();
		let coalescer = Coalescer::new(client, board.clone(), SessionConfig::default());

		coalescer.submit("one");
		tokio::time::sleep(Duration::from_secs(1)).await;
		coalescer.submit("two");
		tokio::time::sleep(Duration::from_secs(1)).await;

		let first = peer.requests.recv().await.unwrap();
		let second = peer.requests.recv().await.unwrap();
		assert_eq!(first.code, "one");
		assert_eq!(second.code, "two");
		assert!(first.generation < second.generation);
	}
}
