//! Channel frame types.

use serde::{Deserialize, Serialize};

/// One token produced by the lexical phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
	/// Source text of the token.
	pub value: String,
	/// Token class name.
	#[serde(rename = "type")]
	pub kind: String,
	/// 1-based source line.
	pub line: u32,
	/// 1-based source column.
	pub column: u32,
}

/// A source snapshot sent over the analysis channel.
///
/// `generation` is a client-side monotonic counter; result frames may echo it
/// so stale responses can be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
	/// Full source text.
	pub code: String,
	/// Monotonic edit generation.
	pub generation: u64,
}

/// Server-to-client frames on the analysis channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisFrame {
	/// Result of the lexical phase.
	LexerResult {
		/// Tokens recognized so far (empty on failure).
		tokens: Vec<Token>,
		/// Whether lexing completed without errors.
		success: bool,
		/// Human-readable error messages.
		errors: Vec<String>,
		/// Echo of [`AnalysisRequest::generation`], when the server supports it.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		generation: Option<u64>,
	},
	/// Result of the syntax phase.
	ParserResult {
		/// Whether parsing completed without internal errors.
		success: bool,
		/// Whether the source is syntactically valid. Gates run-eligibility.
		#[serde(rename = "syntaxValid")]
		syntax_valid: bool,
		/// Human-readable error messages.
		errors: Vec<String>,
		/// Echo of [`AnalysisRequest::generation`], when the server supports it.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		generation: Option<u64>,
	},
	/// Server-side failure unrelated to the submitted source.
	Error {
		/// Description of the failure.
		message: String,
	},
}

/// Server-to-client frames on the execution channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecServerFrame {
	/// A chunk of process standard output.
	Stdout {
		/// Raw output bytes, UTF-8 decoded.
		data: String,
	},
	/// A chunk of process standard error.
	Stderr {
		/// Raw output bytes, UTF-8 decoded.
		data: String,
	},
	/// The process exited. Always the last meaningful frame of a session.
	Exit {
		/// Process exit code.
		exit_code: i32,
	},
	/// The server rejected or aborted the session.
	Error {
		/// Description of the failure.
		message: String,
	},
}

/// Client-to-server frames on the execution channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecClientFrame {
	/// A line of input for the process, newline included.
	Stdin {
		/// Input text.
		data: String,
	},
}
