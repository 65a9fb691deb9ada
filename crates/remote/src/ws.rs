//! WebSocket transports for the two duplex channels.
//!
//! Each connection splits into two tasks: a writer draining the session
//! layer's outbound queue, and a reader decoding text frames into events.
//! Dropping the outbound sender ends the writer, which sends a close frame;
//! that is the normal-closure path. Undecodable frames are logged and
//! skipped rather than tearing the connection down.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kiln_protocol::{AnalysisFrame, AnalysisRequest, ExecClientFrame, ExecServerFrame};
use kiln_session::transport::{
	AnalysisConnection, AnalysisEvent, AnalysisTransport, ExecConnection, ExecEvent, ExecTransport,
};
use kiln_session::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

const QUEUE_DEPTH: usize = 64;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dial `url` and wire the socket to a pair of queues.
///
/// `Req` frames are JSON-encoded onto the socket; inbound text frames decode
/// to `In` and are wrapped into events by the two constructors.
async fn open<Req, In, Ev>(
	url: &str,
	connect_timeout: Duration,
	frame: fn(In) -> Ev,
	closed: fn(Option<String>) -> Ev,
) -> Result<(mpsc::Sender<Req>, mpsc::Receiver<Ev>)>
where
	Req: Serialize + Send + 'static,
	In: DeserializeOwned + Send + 'static,
	Ev: Send + 'static,
{
	let (stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
		.await
		.map_err(|_| Error::ConnectTimeout)?
		.map_err(|err| Error::Transport(err.to_string()))?;
	debug!(url, "websocket connected");
	let (mut sink, mut source) = stream.split();

	let (req_tx, mut req_rx) = mpsc::channel::<Req>(QUEUE_DEPTH);
	let (ev_tx, ev_rx) = mpsc::channel::<Ev>(QUEUE_DEPTH);

	tokio::spawn(async move {
		while let Some(request) = req_rx.recv().await {
			let text = match kiln_protocol::encode(&request) {
				Ok(text) => text,
				Err(err) => {
					warn!(error = %err, "dropping unencodable frame");
					continue;
				}
			};
			if sink.send(Message::Text(text)).await.is_err() {
				return;
			}
		}
		// Outbound queue dropped: normal closure.
		let _ = sink.send(Message::Close(None)).await;
	});

	tokio::spawn(async move {
		loop {
			match source.next().await {
				Some(Ok(Message::Text(text))) => match kiln_protocol::decode::<In>(&text) {
					Ok(decoded) => {
						if ev_tx.send(frame(decoded)).await.is_err() {
							return;
						}
					}
					Err(err) => {
						warn!(error = %err, "dropping undecodable frame");
					}
				},
				Some(Ok(Message::Close(close))) => {
					let reason = close.map(|c| c.reason.to_string()).filter(|r| !r.is_empty());
					let _ = ev_tx.send(closed(reason)).await;
					return;
				}
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					let _ = ev_tx.send(closed(Some(err.to_string()))).await;
					return;
				}
				None => {
					let _ = ev_tx.send(closed(None)).await;
					return;
				}
			}
		}
	});

	Ok((req_tx, ev_rx))
}

/// WebSocket [`AnalysisTransport`] dialing a fixed endpoint.
pub struct WsAnalysisTransport {
	url: Url,
	connect_timeout: Duration,
}

impl WsAnalysisTransport {
	/// Transport for the analysis endpoint at `url`.
	pub fn new(url: Url) -> Self {
		Self {
			url,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
		}
	}

	/// Override the dial deadline.
	pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
		self.connect_timeout = connect_timeout;
		self
	}
}

#[async_trait]
impl AnalysisTransport for WsAnalysisTransport {
	async fn connect(&self) -> Result<AnalysisConnection> {
		let (requests, events) = open::<AnalysisRequest, AnalysisFrame, AnalysisEvent>(
			self.url.as_str(),
			self.connect_timeout,
			AnalysisEvent::Frame,
			|reason| AnalysisEvent::Closed { reason },
		)
		.await?;
		Ok(AnalysisConnection { requests, events })
	}
}

/// WebSocket [`ExecTransport`]. The address comes from the prepare response,
/// one fresh socket per run.
pub struct WsExecTransport {
	connect_timeout: Duration,
}

impl WsExecTransport {
	/// Transport with the default dial deadline.
	pub fn new() -> Self {
		Self {
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
		}
	}

	/// Override the dial deadline.
	pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
		self.connect_timeout = connect_timeout;
		self
	}
}

impl Default for WsExecTransport {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl ExecTransport for WsExecTransport {
	async fn attach(&self, address: &str) -> Result<ExecConnection> {
		// The address is service-provided; reject junk before dialing.
		let url = Url::parse(address).map_err(|err| Error::Transport(err.to_string()))?;
		let (outbound, events) = open::<ExecClientFrame, ExecServerFrame, ExecEvent>(
			url.as_str(),
			self.connect_timeout,
			ExecEvent::Frame,
			|reason| ExecEvent::Closed { reason },
		)
		.await?;
		Ok(ExecConnection { outbound, events })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn serve_one<F, Fut>(handler: F) -> String
	where
		F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
			+ Send
			+ 'static,
		Fut: std::future::Future<Output = ()> + Send,
	{
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
			handler(ws).await;
		});
		format!("ws://{addr}")
	}

	#[tokio::test]
	async fn analysis_round_trip_over_a_real_socket() {
		let url = serve_one(|mut ws| async move {
			let Some(Ok(Message::Text(text))) = ws.next().await else {
				panic!("expected a request frame");
			};
			let request: AnalysisRequest = kiln_protocol::decode(&text).unwrap();
			let reply = kiln_protocol::encode(&AnalysisFrame::LexerResult {
				tokens: vec![],
				success: true,
				errors: vec![],
				generation: Some(request.generation),
			})
			.unwrap();
			ws.send(Message::Text(reply)).await.unwrap();
		})
		.await;

		let transport = WsAnalysisTransport::new(Url::parse(&url).unwrap());
		let mut conn = transport.connect().await.unwrap();
		conn.requests
			.send(AnalysisRequest {
				code: "mn(){}".into(),
				generation: 7,
			})
			.await
			.unwrap();

		let event = conn.events.recv().await.unwrap();
		match event {
			AnalysisEvent::Frame(AnalysisFrame::LexerResult {
				success, generation, ..
			}) => {
				assert!(success);
				assert_eq!(generation, Some(7));
			}
			other => panic!("unexpected event: {other:?}"),
		}
	}

	#[tokio::test]
	async fn server_close_surfaces_a_closed_event() {
		let url = serve_one(|mut ws| async move {
			ws.close(None).await.unwrap();
		})
		.await;

		let transport = WsExecTransport::new();
		let mut conn = transport.attach(&url).await.unwrap();
		let event = conn.events.recv().await.unwrap();
		assert!(matches!(event, ExecEvent::Closed { .. }));
	}

	#[tokio::test]
	async fn exec_stdin_frames_reach_the_server() {
		let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
		let url = serve_one(move |mut ws| async move {
			if let Some(Ok(Message::Text(text))) = ws.next().await {
				let frame: ExecClientFrame = kiln_protocol::decode(&text).unwrap();
				let _ = seen_tx.send(frame);
			}
		})
		.await;

		let transport = WsExecTransport::new();
		let conn = transport.attach(&url).await.unwrap();
		conn.outbound
			.send(ExecClientFrame::Stdin { data: "5\n".into() })
			.await
			.unwrap();

		assert_eq!(
			seen_rx.recv().await,
			Some(ExecClientFrame::Stdin { data: "5\n".into() })
		);
	}

	#[tokio::test]
	async fn junk_exec_address_is_rejected_without_dialing() {
		let transport = WsExecTransport::new();
		assert!(matches!(
			transport.attach("not a url").await,
			Err(Error::Transport(_))
		));
	}
}
