//! Four-phase pipeline status machine.
//!
//! All phase results flow through [`Pipeline::apply`], which enforces the one
//! invariant of the pipeline: a result for phase *i* resets every phase
//! *j > i* to `Pending`. Results only ever invalidate forward, never heal
//! backward. Derived flags such as run-eligibility are computed on read from
//! the current slots, never stored.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

/// One stage of the compile/run pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
	/// Tokenization.
	Lexical,
	/// Parsing.
	Syntax,
	/// Semantic analysis.
	Semantic,
	/// Interactive execution.
	Execution,
}

impl Phase {
	/// All phases, pipeline order.
	pub const ALL: [Phase; 4] = [
		Phase::Lexical,
		Phase::Syntax,
		Phase::Semantic,
		Phase::Execution,
	];

	fn index(self) -> usize {
		match self {
			Phase::Lexical => 0,
			Phase::Syntax => 1,
			Phase::Semantic => 2,
			Phase::Execution => 3,
		}
	}
}

/// Coarse classification of a phase status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusKind {
	/// No result yet, or invalidated by an earlier phase.
	#[default]
	Pending,
	/// Work in flight.
	Running,
	/// Completed successfully.
	Success,
	/// Completed with errors.
	Error,
	/// Informational, neither success nor failure.
	Info,
}

/// Status tag and message for one phase slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseStatus {
	/// Status classification.
	pub kind: StatusKind,
	/// Human-readable detail, if any.
	pub message: Option<String>,
}

impl PhaseStatus {
	/// No result yet.
	pub fn pending() -> Self {
		Self::default()
	}

	/// Work in flight.
	pub fn running(message: impl Into<String>) -> Self {
		Self {
			kind: StatusKind::Running,
			message: Some(message.into()),
		}
	}

	/// Completed successfully.
	pub fn success(message: impl Into<String>) -> Self {
		Self {
			kind: StatusKind::Success,
			message: Some(message.into()),
		}
	}

	/// Completed with errors.
	pub fn error(message: impl Into<String>) -> Self {
		Self {
			kind: StatusKind::Error,
			message: Some(message.into()),
		}
	}

	/// Informational.
	pub fn info(message: impl Into<String>) -> Self {
		Self {
			kind: StatusKind::Info,
			message: Some(message.into()),
		}
	}
}

/// Snapshot of the four phase slots plus the syntax-validity flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
	slots: [PhaseStatus; 4],
	syntax_valid: bool,
}

impl Default for Pipeline {
	fn default() -> Self {
		Self::new()
	}
}

impl Pipeline {
	/// Initial state: everything pending, Lexical ready.
	pub fn new() -> Self {
		let mut slots: [PhaseStatus; 4] = Default::default();
		slots[Phase::Lexical.index()] = PhaseStatus::info("Ready");
		Self {
			slots,
			syntax_valid: false,
		}
	}

	/// Record a result for `phase` and reset every later phase to pending.
	///
	/// A result at or before the syntax phase also clears the syntax-validity
	/// flag; it must be re-established by the next parser result.
	pub fn apply(&mut self, phase: Phase, status: PhaseStatus) {
		let i = phase.index();
		self.slots[i] = status;
		for slot in &mut self.slots[i + 1..] {
			*slot = PhaseStatus::pending();
		}
		if phase <= Phase::Syntax {
			self.syntax_valid = false;
		}
	}

	/// Record the parser verdict. Must follow the `apply` for [`Phase::Syntax`].
	pub fn set_syntax_valid(&mut self, valid: bool) {
		self.syntax_valid = valid;
	}

	/// Status of one phase.
	pub fn phase(&self, phase: Phase) -> &PhaseStatus {
		&self.slots[phase.index()]
	}

	/// Whether the latest parser result declared the source valid.
	pub fn syntax_valid(&self) -> bool {
		self.syntax_valid
	}

	/// Whether a run may be triggered right now.
	///
	/// Pure derivation; nothing is cached. Requires a valid parse, an idle
	/// run session, and non-blank source.
	pub fn can_run(&self, source: &str, session_idle: bool) -> bool {
		self.syntax_valid && session_idle && !source.trim().is_empty()
	}
}

/// Shared, observable owner of the [`Pipeline`] slots.
///
/// The board is the only writer of phase statuses; channel-result handlers
/// and run-lifecycle events mutate it exclusively through [`StatusBoard::apply`]
/// and [`StatusBoard::set_syntax_valid`]. Consumers subscribe to snapshots.
pub struct StatusBoard {
	inner: RwLock<Pipeline>,
	tx: watch::Sender<Pipeline>,
}

impl StatusBoard {
	/// Create a board in the initial pipeline state.
	pub fn new() -> Arc<Self> {
		let pipeline = Pipeline::new();
		let (tx, _) = watch::channel(pipeline.clone());
		Arc::new(Self {
			inner: RwLock::new(pipeline),
			tx,
		})
	}

	/// Record a result for `phase`. See [`Pipeline::apply`].
	pub fn apply(&self, phase: Phase, status: PhaseStatus) {
		let snapshot = {
			let mut pipeline = self.inner.write();
			pipeline.apply(phase, status);
			pipeline.clone()
		};
		let _ = self.tx.send(snapshot);
	}

	/// Record the parser verdict.
	pub fn set_syntax_valid(&self, valid: bool) {
		let snapshot = {
			let mut pipeline = self.inner.write();
			pipeline.set_syntax_valid(valid);
			pipeline.clone()
		};
		let _ = self.tx.send(snapshot);
	}

	/// Current pipeline snapshot.
	pub fn snapshot(&self) -> Pipeline {
		self.inner.read().clone()
	}

	/// Subscribe to pipeline snapshots.
	pub fn subscribe(&self) -> watch::Receiver<Pipeline> {
		self.tx.subscribe()
	}
}
