//! End-to-end flows over the in-memory transports: edit stream to analysis
//! feedback, run trigger to exit, and the forward-invalidation rule across
//! both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_protocol::{
	AnalysisFrame, ExecServerFrame, InputPrompt, PrepareOutcome, SemanticOutcome, Token,
};
use kiln_session::transport::memory::{MemoryAnalysisTransport, MemoryExecTransport};
use kiln_session::transport::{AnalysisEvent, ExecEvent};
use kiln_session::{
	AnalysisClient, Coalescer, InputCollector, Phase, PrepareService, Result, RunManager,
	SessionConfig, StatusBoard, StatusKind, TerminalSink,
};
use parking_lot::Mutex;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct OneShotService {
	outcome: Mutex<Option<PrepareOutcome>>,
}

impl OneShotService {
	fn ready(run_id: &str) -> Arc<Self> {
		Arc::new(Self {
			outcome: Mutex::new(Some(PrepareOutcome::Ready {
				run_id: run_id.into(),
				channel_address: format!("mem://{run_id}"),
				artifact: Some("int main(){}".into()),
			})),
		})
	}
}

#[async_trait]
impl PrepareService for OneShotService {
	async fn semantic_check(&self, _source: &str) -> Result<SemanticOutcome> {
		Ok(SemanticOutcome {
			success: true,
			errors: vec![],
		})
	}

	async fn prepare(&self, _source: &str) -> Result<PrepareOutcome> {
		Ok(self.outcome.lock().take().expect("prepare called twice"))
	}

	async fn prepare_with_inputs(
		&self,
		source: &str,
		_inputs: &HashMap<String, String>,
	) -> Result<PrepareOutcome> {
		self.prepare(source).await
	}
}

struct NoInputs;

#[async_trait]
impl InputCollector for NoInputs {
	async fn collect(&self, _prompts: &[InputPrompt]) -> Option<HashMap<String, String>> {
		None
	}
}

#[derive(Default)]
struct CapturingSink {
	out: Mutex<String>,
}

impl TerminalSink for CapturingSink {
	fn stdout(&self, data: &str) {
		self.out.lock().push_str(data);
	}

	fn stderr(&self, data: &str) {
		self.out.lock().push_str(data);
	}
}

fn lexer_ok(generation: u64) -> AnalysisFrame {
	AnalysisFrame::LexerResult {
		tokens: vec![Token {
			value: "mn".into(),
			kind: "keyword".into(),
			line: 1,
			column: 1,
		}],
		success: true,
		errors: vec![],
		generation: Some(generation),
	}
}

fn parser_ok(generation: u64) -> AnalysisFrame {
	AnalysisFrame::ParserResult {
		success: true,
		syntax_valid: true,
		errors: vec![],
		generation: Some(generation),
	}
}

#[tokio::test(start_paused = true)]
async fn edit_stream_to_exit_zero() {
	init_tracing();
	let source = "mn(){prnt(1);end;}";

	let (analysis_transport, mut analysis_accept) = MemoryAnalysisTransport::new();
	let board = StatusBoard::new();
	let client = AnalysisClient::new(analysis_transport, board.clone(), SessionConfig::default());
	client.connect().await.unwrap();
	let mut analysis_peer = analysis_accept.recv().await.unwrap();
	let coalescer = Coalescer::new(client.clone(), board.clone(), SessionConfig::default());

	// A burst of edits coalesces into a single request.
	coalescer.submit("mn(){");
	tokio::time::sleep(Duration::from_millis(100)).await;
	coalescer.submit(source);
	let request = analysis_peer.requests.recv().await.unwrap();
	assert_eq!(request.code, source);

	// Staged feedback arrives and unlocks the run trigger.
	analysis_peer
		.events
		.send(AnalysisEvent::Frame(lexer_ok(request.generation)))
		.await
		.unwrap();
	analysis_peer
		.events
		.send(AnalysisEvent::Frame(parser_ok(request.generation)))
		.await
		.unwrap();
	tokio::task::yield_now().await;

	let snap = board.snapshot();
	assert_eq!(snap.phase(Phase::Lexical).kind, StatusKind::Success);
	assert_eq!(snap.phase(Phase::Syntax).kind, StatusKind::Success);
	assert!(snap.syntax_valid());
	assert_eq!(client.tokens().len(), 1);

	// Trigger the run against the prepared service.
	let (exec_transport, mut exec_accept) = MemoryExecTransport::new();
	let sink = Arc::new(CapturingSink::default());
	let manager = RunManager::new(
		board.clone(),
		OneShotService::ready("r1"),
		Arc::new(NoInputs),
		exec_transport,
		sink.clone(),
		SessionConfig::default(),
	);
	assert!(manager.can_run(source));
	manager.start_run(source).await.unwrap();

	let exec_peer = exec_accept.recv().await.unwrap();
	assert_eq!(exec_peer.address, "mem://r1");
	exec_peer
		.events
		.send(ExecEvent::Frame(ExecServerFrame::Stdout { data: "1\n".into() }))
		.await
		.unwrap();
	exec_peer
		.events
		.send(ExecEvent::Frame(ExecServerFrame::Exit { exit_code: 0 }))
		.await
		.unwrap();
	tokio::task::yield_now().await;
	tokio::task::yield_now().await;

	let snap = board.snapshot();
	assert_eq!(snap.phase(Phase::Execution).kind, StatusKind::Success);
	assert_eq!(&*sink.out.lock(), "1\n");
	assert!(manager.is_idle());
	// Syntax feedback survives the run, so another run is allowed.
	assert!(manager.can_run(source));
}

#[tokio::test(start_paused = true)]
async fn an_edit_after_a_run_invalidates_downstream_feedback() {
	init_tracing();
	let source = "mn(){end;}";

	let (analysis_transport, mut analysis_accept) = MemoryAnalysisTransport::new();
	let board = StatusBoard::new();
	let client = AnalysisClient::new(analysis_transport, board.clone(), SessionConfig::default());
	client.connect().await.unwrap();
	let mut analysis_peer = analysis_accept.recv().await.unwrap();
	let coalescer = Coalescer::new(client.clone(), board.clone(), SessionConfig::default());

	coalescer.submit(source);
	let request = analysis_peer.requests.recv().await.unwrap();
	for frame in [lexer_ok(request.generation), parser_ok(request.generation)] {
		analysis_peer
			.events
			.send(AnalysisEvent::Frame(frame))
			.await
			.unwrap();
	}
	tokio::task::yield_now().await;

	let (exec_transport, mut exec_accept) = MemoryExecTransport::new();
	let manager = RunManager::new(
		board.clone(),
		OneShotService::ready("r1"),
		Arc::new(NoInputs),
		exec_transport,
		Arc::new(CapturingSink::default()),
		SessionConfig::default(),
	);
	manager.start_run(source).await.unwrap();
	let exec_peer = exec_accept.recv().await.unwrap();
	exec_peer
		.events
		.send(ExecEvent::Frame(ExecServerFrame::Exit { exit_code: 0 }))
		.await
		.unwrap();
	tokio::task::yield_now().await;
	tokio::task::yield_now().await;
	assert_eq!(
		board.snapshot().phase(Phase::Execution).kind,
		StatusKind::Success
	);

	// A new edit restarts the pipeline: everything after Lexical resets and
	// the run trigger locks until the next parser verdict.
	coalescer.submit("mn(){prnt(");
	let request = analysis_peer.requests.recv().await.unwrap();
	analysis_peer
		.events
		.send(AnalysisEvent::Frame(lexer_ok(request.generation)))
		.await
		.unwrap();
	tokio::task::yield_now().await;

	let snap = board.snapshot();
	assert_eq!(snap.phase(Phase::Syntax).kind, StatusKind::Pending);
	assert_eq!(snap.phase(Phase::Execution).kind, StatusKind::Pending);
	assert!(!manager.can_run("mn(){prnt("));
}

#[tokio::test(start_paused = true)]
async fn analysis_feedback_resumes_after_a_reconnect() {
	init_tracing();

	let (analysis_transport, mut analysis_accept) = MemoryAnalysisTransport::new();
	let board = StatusBoard::new();
	let client = AnalysisClient::new(analysis_transport, board.clone(), SessionConfig::default());
	client.connect().await.unwrap();
	let peer = analysis_accept.recv().await.unwrap();
	let coalescer = Coalescer::new(client.clone(), board.clone(), SessionConfig::default());

	// Server goes away; the client redials on its own.
	drop(peer);
	let mut replacement = analysis_accept.recv().await.expect("client should redial");

	coalescer.submit("mn(){}");
	let request = replacement.requests.recv().await.unwrap();
	assert_eq!(request.code, "mn(){}");
	replacement
		.events
		.send(AnalysisEvent::Frame(lexer_ok(request.generation)))
		.await
		.unwrap();
	tokio::task::yield_now().await;
	assert_eq!(
		board.snapshot().phase(Phase::Lexical).kind,
		StatusKind::Success
	);
}
