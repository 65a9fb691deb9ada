//! Execution channel client.
//!
//! One connection per run session, duplex and line-oriented: process output
//! frames stream to a [`TerminalSink`], stdin lines go out as frames. The
//! client emits lifecycle events to its owner (the run session manager) and
//! guarantees exactly one exit event per attachment.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_protocol::{ExecClientFrame, ExecServerFrame};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{ExecEvent, ExecTransport};
use crate::{Error, Result};

/// Lifecycle events emitted toward the run session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecLifecycle {
	/// The connection is open and the process is live.
	Attached,
	/// The process exited with the given code. Emitted at most once.
	Exited(i32),
	/// The connection dropped before an exit frame was seen.
	ConnectionLost {
		/// Transport-provided detail, if any.
		reason: Option<String>,
	},
}

/// Receiver of process output, implemented by the terminal view.
///
/// Stderr is delivered separately so presentation can distinguish it; the
/// protocol itself makes no such distinction beyond the frame tag.
pub trait TerminalSink: Send + Sync {
	/// Process standard output, verbatim.
	fn stdout(&self, data: &str);
	/// Process standard error, verbatim.
	fn stderr(&self, data: &str);
}

struct ActiveChannel {
	session: String,
	outbound: mpsc::Sender<ExecClientFrame>,
	pump: JoinHandle<()>,
}

/// Client owning at most one execution connection at a time.
pub struct ExecClient {
	transport: Arc<dyn ExecTransport>,
	active: Mutex<Option<ActiveChannel>>,
	// Bumped on every close; an attach that dialed under an older value
	// must not register its connection.
	nonce: AtomicU64,
}

impl ExecClient {
	/// Create a detached client.
	pub fn new(transport: Arc<dyn ExecTransport>) -> Self {
		Self {
			transport,
			active: Mutex::new(None),
			nonce: AtomicU64::new(0),
		}
	}

	/// Open a connection for `session` at `address`.
	///
	/// Fails with [`Error::ChannelBusy`] while a connection for a different
	/// session is still open; the caller must close that one first. A
	/// [`close`](Self::close) that lands while the dial is in flight wins:
	/// the late connection is discarded and [`Error::AttachSuperseded`]
	/// returned, so a superseded attach can never clobber a newer one. On
	/// success the returned receiver yields [`ExecLifecycle::Attached`]
	/// followed by terminal lifecycle events.
	pub async fn attach(
		&self,
		session: &str,
		address: &str,
		sink: Arc<dyn TerminalSink>,
	) -> Result<mpsc::UnboundedReceiver<ExecLifecycle>> {
		{
			let active = self.active.lock();
			if let Some(active) = active.as_ref() {
				if active.session != session {
					return Err(Error::ChannelBusy(active.session.clone()));
				}
			}
		}
		// Re-attach for the same session replaces the old connection.
		self.close();
		let nonce = self.nonce.load(Ordering::SeqCst);

		let conn = self.transport.attach(address).await?;

		let mut active = self.active.lock();
		if self.nonce.load(Ordering::SeqCst) != nonce {
			debug!(session, "discarding connection from superseded attach");
			return Err(Error::AttachSuperseded);
		}
		let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
		let _ = lifecycle_tx.send(ExecLifecycle::Attached);
		// Fresh prompt line for the terminal view.
		sink.stdout("");

		let session_id = session.to_string();
		let pump = tokio::spawn(pump(conn.events, sink, lifecycle_tx, session_id.clone()));
		*active = Some(ActiveChannel {
			session: session_id,
			outbound: conn.outbound,
			pump,
		});
		Ok(lifecycle_rx)
	}

	/// Session id of the open connection, if any.
	pub fn session(&self) -> Option<String> {
		self.active.lock().as_ref().map(|a| a.session.clone())
	}

	/// Queue one line of stdin, newline appended.
	///
	/// Never fails: when the connection is not open the line is dropped with
	/// a warning so a racing keystroke cannot crash the input path.
	pub fn send_line(&self, line: &str) {
		let guard = self.active.lock();
		let Some(active) = guard.as_ref() else {
			warn!("stdin line dropped: execution channel not open");
			return;
		};
		let frame = ExecClientFrame::Stdin {
			data: format!("{line}\n"),
		};
		if let Err(err) = active.outbound.try_send(frame) {
			warn!(error = %err, "stdin line dropped: channel unavailable");
		}
	}

	/// Close the connection, if open. Idempotent.
	///
	/// Dropping the outbound queue is the normal-closure signal to the
	/// transport.
	pub fn close(&self) {
		self.nonce.fetch_add(1, Ordering::SeqCst);
		if let Some(active) = self.active.lock().take() {
			debug!(session = %active.session, "closing execution channel");
			active.pump.abort();
		}
	}
}

impl Drop for ExecClient {
	fn drop(&mut self) {
		self.close();
	}
}

/// Forward frames to the sink and lifecycle events to the owner. Stops at the
/// first exit frame; anything after it is dropped.
async fn pump(
	mut events: mpsc::Receiver<ExecEvent>,
	sink: Arc<dyn TerminalSink>,
	lifecycle: mpsc::UnboundedSender<ExecLifecycle>,
	session: String,
) {
	loop {
		match events.recv().await {
			Some(ExecEvent::Frame(ExecServerFrame::Stdout { data })) => sink.stdout(&data),
			Some(ExecEvent::Frame(ExecServerFrame::Stderr { data })) => sink.stderr(&data),
			Some(ExecEvent::Frame(ExecServerFrame::Exit { exit_code })) => {
				debug!(session = %session, exit_code, "process exited");
				let _ = lifecycle.send(ExecLifecycle::Exited(exit_code));
				return;
			}
			Some(ExecEvent::Frame(ExecServerFrame::Error { message })) => {
				warn!(session = %session, message = %message, "execution channel error frame");
				sink.stderr(&message);
			}
			Some(ExecEvent::Closed { reason }) => {
				let _ = lifecycle.send(ExecLifecycle::ConnectionLost { reason });
				return;
			}
			None => {
				let _ = lifecycle.send(ExecLifecycle::ConnectionLost { reason: None });
				return;
			}
		}
	}
}
