//! Run session manager.
//!
//! Drives one run attempt from trigger to exit or cancel:
//!
//! ```text
//! Idle → Preparing → {AwaitingInput | Connecting} → Attached → {Exited | Failed}
//! ```
//!
//! with a cancel edge from every non-terminal state back to `Idle`. The
//! manager is the sole authority for opening and closing the execution
//! channel; at most one session is ever non-idle, and starting a new run
//! tears down any previous channel before dialing a new one.
//!
//! Cancellation discipline: every session start bumps an epoch counter, and
//! every await point and channel event re-checks it. A frame that raced a
//! cancel therefore cannot resurrect a closed session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kiln_protocol::{InputPrompt, PrepareOutcome, SemanticOutcome};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::exec::{ExecClient, ExecLifecycle, TerminalSink};
use crate::status::{Phase, PhaseStatus, StatusBoard};
use crate::term::TerminalInputBuffer;
use crate::transport::ExecTransport;
use crate::{Error, Result};

/// Phase of the run session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPhase {
	/// No run in progress.
	#[default]
	Idle,
	/// The prepare call is in flight.
	Preparing,
	/// Waiting for the user to supply runtime inputs.
	AwaitingInput,
	/// Dialing the execution channel.
	Connecting,
	/// The channel is open and the process is live.
	Attached,
	/// The process exited.
	Exited,
	/// Preparation or connection failed.
	Failed,
}

#[derive(Debug, Default)]
struct RunSession {
	id: Option<String>,
	phase: RunPhase,
	artifact: Option<String>,
	exit_code: Option<i32>,
}

/// The prepare/execute side of the remote compiler.
#[async_trait]
pub trait PrepareService: Send + Sync {
	/// Synchronous semantic check of the source.
	async fn semantic_check(&self, source: &str) -> Result<SemanticOutcome>;

	/// Analyze, transpile, and compile the source for interactive execution.
	async fn prepare(&self, source: &str) -> Result<PrepareOutcome>;

	/// Like [`prepare`](Self::prepare), with pre-collected runtime inputs.
	async fn prepare_with_inputs(
		&self,
		source: &str,
		inputs: &HashMap<String, String>,
	) -> Result<PrepareOutcome>;
}

/// Collects runtime inputs from the user.
#[async_trait]
pub trait InputCollector: Send + Sync {
	/// Ask the user for the given prompts. `None` means the user cancelled.
	async fn collect(&self, prompts: &[InputPrompt]) -> Option<HashMap<String, String>>;
}

/// Orchestrator for the run lifecycle.
pub struct RunManager {
	board: Arc<StatusBoard>,
	service: Arc<dyn PrepareService>,
	collector: Arc<dyn InputCollector>,
	sink: Arc<dyn TerminalSink>,
	exec: ExecClient,
	session: Mutex<RunSession>,
	term: Mutex<TerminalInputBuffer>,
	epoch: AtomicU64,
	config: SessionConfig,
}

impl RunManager {
	/// Wire up a manager. The exec transport is owned exclusively from here on.
	pub fn new(
		board: Arc<StatusBoard>,
		service: Arc<dyn PrepareService>,
		collector: Arc<dyn InputCollector>,
		exec_transport: Arc<dyn ExecTransport>,
		sink: Arc<dyn TerminalSink>,
		config: SessionConfig,
	) -> Arc<Self> {
		Arc::new(Self {
			board,
			service,
			collector,
			sink,
			exec: ExecClient::new(exec_transport),
			session: Mutex::new(RunSession::default()),
			term: Mutex::new(TerminalInputBuffer::new()),
			epoch: AtomicU64::new(0),
			config,
		})
	}

	/// Current phase of the session state machine.
	pub fn phase(&self) -> RunPhase {
		self.session.lock().phase
	}

	/// Whether no run is in progress.
	pub fn is_idle(&self) -> bool {
		self.phase() == RunPhase::Idle
	}

	/// Transpiled artifact of the current or last failed run, if any.
	pub fn artifact(&self) -> Option<String> {
		self.session.lock().artifact.clone()
	}

	/// Whether a run may be triggered for `source` right now.
	pub fn can_run(&self, source: &str) -> bool {
		self.board.snapshot().can_run(source, self.is_idle())
	}

	/// Run the synchronous semantic check and reflect it on the board.
	pub async fn check_semantics(&self, source: &str) {
		self.board
			.apply(Phase::Semantic, PhaseStatus::running("Checking…"));
		match self.service.semantic_check(source).await {
			Ok(SemanticOutcome { success: true, .. }) => self.board.apply(
				Phase::Semantic,
				PhaseStatus::success("Semantic analysis passed"),
			),
			Ok(SemanticOutcome { errors, .. }) => self
				.board
				.apply(Phase::Semantic, PhaseStatus::error(errors.join("\n"))),
			Err(err) => self.board.apply(
				Phase::Semantic,
				PhaseStatus::error(format!("Semantic check failed: {err}")),
			),
		}
	}

	/// Trigger a run for `source`.
	///
	/// Rejects synchronously, with no side effects, unless the latest parser
	/// verdict is valid and the source is non-blank. A session that is still
	/// live is superseded: its channel is closed before the new prepare call
	/// is made. Service failures are not returned; they end as `Failed`
	/// status transitions per the error-propagation policy.
	pub async fn start_run(self: &Arc<Self>, source: &str) -> Result<()> {
		if !self.board.snapshot().can_run(source, true) {
			return Err(Error::NotRunnable(
				"source is empty or has not passed syntax validation".into(),
			));
		}
		if !self.is_idle() {
			info!("superseding live run session");
			self.teardown_quiet();
		}

		let epoch = self.bump_epoch();
		{
			let mut session = self.session.lock();
			*session = RunSession {
				phase: RunPhase::Preparing,
				..RunSession::default()
			};
		}
		self.board
			.apply(Phase::Semantic, PhaseStatus::running("Checking semantics…"));
		self.board
			.apply(Phase::Execution, PhaseStatus::running("Starting…"));

		let outcome = match self.service.prepare(source).await {
			Ok(outcome) => outcome,
			Err(err) => {
				self.fail_prepare(epoch, err.to_string());
				return Ok(());
			}
		};
		if !self.still(epoch) {
			return Ok(());
		}

		let outcome = match outcome {
			PrepareOutcome::InputRequired { prompts } => {
				match self.await_inputs(epoch, source, &prompts).await {
					Some(outcome) => outcome,
					None => return Ok(()),
				}
			}
			other => other,
		};
		if !self.still(epoch) {
			return Ok(());
		}

		match outcome {
			PrepareOutcome::Failed {
				phase,
				errors,
				artifact,
			} => {
				debug!(phase = phase.as_deref().unwrap_or("unknown"), "prepare failed");
				self.session.lock().artifact = artifact;
				self.fail_prepare(epoch, errors.join("\n"));
			}
			PrepareOutcome::InputRequired { .. } => {
				// The service asked again after inputs were supplied.
				self.fail_prepare(epoch, "service still requires input".into());
			}
			PrepareOutcome::Ready {
				run_id,
				channel_address,
				artifact,
			} => {
				self.attach(epoch, run_id, channel_address, artifact).await;
			}
		}
		Ok(())
	}

	/// Abort the current run, if any. Idempotent; safe to call from any state.
	pub fn cancel(&self) {
		if self.is_idle() {
			return;
		}
		info!("run session cancelled");
		self.teardown_quiet();
		self.board
			.apply(Phase::Execution, PhaseStatus::info("Stopped"));
	}

	/// Feed one terminal keystroke: echo locally, flush the line on Enter.
	pub fn push_key(&self, key: char) {
		let effect = self.term.lock().push_key(key);
		if let Some(echo) = effect.echo {
			self.sink.stdout(&echo);
		}
		if let Some(line) = effect.line {
			self.exec.send_line(&line);
		}
	}

	/// Collect runtime inputs and re-run prepare with them. `None` means the
	/// flow ended (cancelled or superseded) and the caller should stop.
	async fn await_inputs(
		self: &Arc<Self>,
		epoch: u64,
		source: &str,
		prompts: &[InputPrompt],
	) -> Option<PrepareOutcome> {
		self.session.lock().phase = RunPhase::AwaitingInput;
		self.board
			.apply(Phase::Execution, PhaseStatus::info("Input Required"));

		let inputs = self.collector.collect(prompts).await;
		if !self.still(epoch) {
			return None;
		}
		let Some(inputs) = inputs else {
			debug!("input collection cancelled by user");
			self.clear_session();
			self.board
				.apply(Phase::Execution, PhaseStatus::info("Cancelled"));
			return None;
		};

		match self.service.prepare_with_inputs(source, &inputs).await {
			Ok(outcome) => Some(outcome),
			Err(err) => {
				self.fail_prepare(epoch, err.to_string());
				None
			}
		}
	}

	/// Dial the execution channel and hand the event stream to a watcher.
	async fn attach(
		self: &Arc<Self>,
		epoch: u64,
		run_id: String,
		channel_address: String,
		artifact: Option<String>,
	) {
		{
			let mut session = self.session.lock();
			session.id = Some(run_id.clone());
			session.artifact = artifact;
			session.phase = RunPhase::Connecting;
		}
		self.board.apply(
			Phase::Semantic,
			PhaseStatus::success("Semantic analysis passed"),
		);
		self.board
			.apply(Phase::Execution, PhaseStatus::running("Connecting…"));
		self.term.lock().reset();

		let attach = tokio::time::timeout(
			self.config.connect_timeout(),
			self.exec.attach(&run_id, &channel_address, self.sink.clone()),
		)
		.await;
		// A stale epoch means a cancel or supersede already tore the channel
		// down; the exec client discards a dial that raced its close, so
		// there is nothing left to release here.
		if !self.still(epoch) {
			return;
		}

		let lifecycle = match attach {
			Ok(Ok(lifecycle)) => lifecycle,
			Ok(Err(err)) => {
				warn!(error = %err, "execution channel attach failed");
				self.fail_connect(epoch, format!("Connection failed: {err}"));
				return;
			}
			Err(_) => {
				self.fail_connect(epoch, "Connection timed out".into());
				return;
			}
		};

		self.session.lock().phase = RunPhase::Attached;
		self.board
			.apply(Phase::Execution, PhaseStatus::running("Process Started"));
		tokio::spawn(self.clone().watch_channel(epoch, lifecycle));
	}

	/// Apply channel lifecycle events until the session ends. Events arriving
	/// after a cancel or supersede (epoch mismatch) are ignored.
	async fn watch_channel(
		self: Arc<Self>,
		epoch: u64,
		mut lifecycle: mpsc::UnboundedReceiver<ExecLifecycle>,
	) {
		while let Some(event) = lifecycle.recv().await {
			if !self.still(epoch) {
				return;
			}
			match event {
				ExecLifecycle::Attached => {}
				ExecLifecycle::Exited(code) => {
					{
						let mut session = self.session.lock();
						session.exit_code = Some(code);
						session.phase = RunPhase::Exited;
					}
					let status = if code == 0 {
						PhaseStatus::success(format!("Exited ({code})"))
					} else {
						PhaseStatus::error(format!("Exited ({code})"))
					};
					self.board.apply(Phase::Execution, status);
					self.exec.close();
					self.term.lock().reset();
					self.clear_session();
					return;
				}
				ExecLifecycle::ConnectionLost { reason } => {
					warn!(reason = reason.as_deref().unwrap_or("unknown"), "execution connection lost");
					self.board.apply(
						Phase::Execution,
						PhaseStatus::error("Connection lost"),
					);
					self.exec.close();
					self.term.lock().reset();
					self.clear_session();
					return;
				}
			}
		}
	}

	/// Prepare-path failure: semantic slot carries the detail, execution is
	/// aborted, and the session returns to idle after reporting.
	fn fail_prepare(&self, epoch: u64, message: String) {
		if !self.still(epoch) {
			return;
		}
		self.session.lock().phase = RunPhase::Failed;
		self.board
			.apply(Phase::Semantic, PhaseStatus::error(message));
		self.board
			.apply(Phase::Execution, PhaseStatus::error("Aborted"));
		self.clear_session();
	}

	/// Connect-path failure: semantics already passed, only execution failed.
	fn fail_connect(&self, epoch: u64, message: String) {
		if !self.still(epoch) {
			return;
		}
		self.session.lock().phase = RunPhase::Failed;
		self.board
			.apply(Phase::Execution, PhaseStatus::error(message));
		self.clear_session();
	}

	/// Tear down the live session without reporting status.
	fn teardown_quiet(&self) {
		self.bump_epoch();
		self.exec.close();
		self.term.lock().reset();
		self.clear_session();
	}

	fn clear_session(&self) {
		let mut session = self.session.lock();
		let artifact = session.artifact.take();
		*session = RunSession {
			// The artifact survives for display until the next run.
			artifact,
			..RunSession::default()
		};
	}

	fn bump_epoch(&self) -> u64 {
		self.epoch.fetch_add(1, Ordering::SeqCst) + 1
	}

	fn still(&self, epoch: u64) -> bool {
		self.epoch.load(Ordering::SeqCst) == epoch
	}
}
