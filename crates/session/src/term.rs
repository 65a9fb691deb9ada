//! Keystroke-to-line assembly for the interactive terminal.
//!
//! The remote process reads input line-by-line, so keystrokes accumulate
//! locally and flush only on Enter. Echo happens locally too; waiting for a
//! server echo would put a network round-trip on every keypress.

/// Visual-backspace sequence: move left, overwrite with space, move left.
const ERASE: &str = "\u{8} \u{8}";

/// What the caller should do after feeding one keystroke.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEffect {
	/// Text to echo to the terminal view, if any.
	pub echo: Option<String>,
	/// Completed line to flush to the execution channel, if Enter was pressed.
	pub line: Option<String>,
}

/// Pure keystroke state machine, one per attached session.
#[derive(Debug, Default)]
pub struct TerminalInputBuffer {
	pending: String,
}

impl TerminalInputBuffer {
	/// Empty buffer.
	pub fn new() -> Self {
		Self::default()
	}

	/// The line assembled so far.
	pub fn pending(&self) -> &str {
		&self.pending
	}

	/// Drop any partial line. Called on attach and detach.
	pub fn reset(&mut self) {
		self.pending.clear();
	}

	/// Feed one keystroke.
	///
	/// Printable characters append and echo; Backspace/DEL erase the last
	/// pending character; Enter yields the completed line and clears the
	/// buffer unconditionally. All other control codes are ignored.
	pub fn push_key(&mut self, key: char) -> KeyEffect {
		match key {
			'\r' | '\n' => KeyEffect {
				echo: Some("\n".to_string()),
				line: Some(std::mem::take(&mut self.pending)),
			},
			'\u{8}' | '\u{7f}' => {
				if self.pending.pop().is_some() {
					KeyEffect {
						echo: Some(ERASE.to_string()),
						line: None,
					}
				} else {
					KeyEffect::default()
				}
			}
			c if (c as u32) >= 32 => {
				self.pending.push(c);
				KeyEffect {
					echo: Some(c.to_string()),
					line: None,
				}
			}
			_ => KeyEffect::default(),
		}
	}
}
