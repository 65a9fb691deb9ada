//! Transport seams for the two channels.
//!
//! A transport hands out connection handles: an outbound `mpsc` sender plus an
//! inbound event receiver. The session layer owns the handles exclusively and
//! treats them as explicitly acquired, explicitly released resources; dropping
//! the outbound sender is the close signal to the transport.

use async_trait::async_trait;
use kiln_protocol::{AnalysisFrame, AnalysisRequest, ExecClientFrame, ExecServerFrame};
use tokio::sync::mpsc;

use crate::Result;

/// Queue depth for per-connection channels.
pub(crate) const CHANNEL_DEPTH: usize = 64;

/// Inbound events on the analysis channel.
#[derive(Debug)]
pub enum AnalysisEvent {
	/// A decoded frame arrived.
	Frame(AnalysisFrame),
	/// The connection closed; no further events will arrive.
	Closed {
		/// Transport-provided detail, if any.
		reason: Option<String>,
	},
}

/// One live analysis connection.
#[derive(Debug)]
pub struct AnalysisConnection {
	/// Outbound request queue. Dropping it closes the connection.
	pub requests: mpsc::Sender<AnalysisRequest>,
	/// Inbound event stream, delivered in receipt order.
	pub events: mpsc::Receiver<AnalysisEvent>,
}

/// Factory for the persistent analysis connection.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
	/// Establish a fresh connection.
	async fn connect(&self) -> Result<AnalysisConnection>;
}

/// Inbound events on the execution channel.
#[derive(Debug)]
pub enum ExecEvent {
	/// A decoded frame arrived.
	Frame(ExecServerFrame),
	/// The connection closed; no further events will arrive.
	Closed {
		/// Transport-provided detail, if any.
		reason: Option<String>,
	},
}

/// One live execution connection.
#[derive(Debug)]
pub struct ExecConnection {
	/// Outbound frame queue. Dropping it closes the connection normally.
	pub outbound: mpsc::Sender<ExecClientFrame>,
	/// Inbound event stream, delivered in receipt order.
	pub events: mpsc::Receiver<ExecEvent>,
}

/// Factory for per-run execution connections.
#[async_trait]
pub trait ExecTransport: Send + Sync {
	/// Open a connection to the given channel address.
	async fn attach(&self, address: &str) -> Result<ExecConnection>;
}

pub mod memory {
	//! In-process transports for tests.

	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;

	/// Server half of one in-memory analysis connection.
	#[derive(Debug)]
	pub struct AnalysisPeer {
		/// Requests sent by the client under test.
		pub requests: mpsc::Receiver<AnalysisRequest>,
		/// Inject events toward the client. Dropping it closes the channel.
		pub events: mpsc::Sender<AnalysisEvent>,
	}

	/// In-memory [`AnalysisTransport`]. Each `connect` yields a fresh peer on
	/// the accept queue.
	pub struct MemoryAnalysisTransport {
		accept_tx: mpsc::UnboundedSender<AnalysisPeer>,
		refuse: AtomicBool,
	}

	impl MemoryAnalysisTransport {
		/// Create the transport and the accept queue for its peers.
		pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AnalysisPeer>) {
			let (accept_tx, accept_rx) = mpsc::unbounded_channel();
			(
				Arc::new(Self {
					accept_tx,
					refuse: AtomicBool::new(false),
				}),
				accept_rx,
			)
		}

		/// Make subsequent `connect` calls fail, for reconnect-cap tests.
		pub fn set_refuse(&self, refuse: bool) {
			self.refuse.store(refuse, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl AnalysisTransport for MemoryAnalysisTransport {
		async fn connect(&self) -> Result<AnalysisConnection> {
			if self.refuse.load(Ordering::SeqCst) {
				return Err(crate::Error::Transport("connection refused".into()));
			}
			let (req_tx, req_rx) = mpsc::channel(CHANNEL_DEPTH);
			let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_DEPTH);
			self.accept_tx
				.send(AnalysisPeer {
					requests: req_rx,
					events: ev_tx,
				})
				.map_err(|_| crate::Error::Transport("acceptor gone".into()))?;
			Ok(AnalysisConnection {
				requests: req_tx,
				events: ev_rx,
			})
		}
	}

	/// Server half of one in-memory execution connection.
	#[derive(Debug)]
	pub struct ExecPeer {
		/// Address the client attached to.
		pub address: String,
		/// Frames sent by the client under test.
		pub outbound: mpsc::Receiver<ExecClientFrame>,
		/// Inject events toward the client. Dropping it closes the channel.
		pub events: mpsc::Sender<ExecEvent>,
	}

	/// In-memory [`ExecTransport`]. Each `attach` yields a fresh peer on the
	/// accept queue.
	pub struct MemoryExecTransport {
		accept_tx: mpsc::UnboundedSender<ExecPeer>,
		refuse: AtomicBool,
	}

	impl MemoryExecTransport {
		/// Create the transport and the accept queue for its peers.
		pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ExecPeer>) {
			let (accept_tx, accept_rx) = mpsc::unbounded_channel();
			(
				Arc::new(Self {
					accept_tx,
					refuse: AtomicBool::new(false),
				}),
				accept_rx,
			)
		}

		/// Make subsequent `attach` calls fail.
		pub fn set_refuse(&self, refuse: bool) {
			self.refuse.store(refuse, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl ExecTransport for MemoryExecTransport {
		async fn attach(&self, address: &str) -> Result<ExecConnection> {
			if self.refuse.load(Ordering::SeqCst) {
				return Err(crate::Error::Transport("connection refused".into()));
			}
			let (out_tx, out_rx) = mpsc::channel(CHANNEL_DEPTH);
			let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_DEPTH);
			self.accept_tx
				.send(ExecPeer {
					address: address.to_string(),
					outbound: out_rx,
					events: ev_tx,
				})
				.map_err(|_| crate::Error::Transport("acceptor gone".into()))?;
			Ok(ExecConnection {
				outbound: out_tx,
				events: ev_rx,
			})
		}
	}
}
