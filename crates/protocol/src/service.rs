//! Request/response shapes of the synchronous compiler services.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome of the synchronous semantic-check call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticOutcome {
	/// Whether semantic analysis passed.
	pub success: bool,
	/// Human-readable error messages.
	#[serde(default)]
	pub errors: Vec<String>,
}

/// One runtime-input prompt discovered by the prepare service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPrompt {
	/// Name of the variable the input is bound to.
	pub variable_name: String,
	/// Text shown to the user.
	pub prompt_text: String,
	/// Source line of the read.
	pub line: u32,
	/// Declared type of the variable.
	pub variable_type: String,
}

/// Request body for the run-with-input service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWithInputRequest {
	/// Full source text.
	pub code: String,
	/// Collected inputs, variable name to user-entered value.
	pub inputs: HashMap<String, String>,
}

/// Raw wire shape of the prepare-run response.
///
/// The upstream service multiplexes three outcomes over one object; use
/// [`PrepareResponse::into_outcome`] to get the typed view.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
	/// Present and `"input_required"` when the program reads runtime input.
	#[serde(default)]
	pub status: Option<String>,
	/// Whether preparation succeeded.
	#[serde(default)]
	pub success: bool,
	/// Opaque run session token.
	#[serde(default)]
	pub run_id: Option<String>,
	/// Address of the per-run execution channel.
	#[serde(default, rename = "websocketUrl")]
	pub channel_address: Option<String>,
	/// Pipeline phase that failed, when unsuccessful.
	#[serde(default)]
	pub phase: Option<String>,
	/// Human-readable error messages.
	#[serde(default)]
	pub errors: Vec<String>,
	/// Transpiled program text, when the pipeline got that far.
	#[serde(default, rename = "transpiledCode")]
	pub artifact: Option<String>,
	/// Runtime-input prompts, for the input-required outcome.
	#[serde(default)]
	pub prompts: Vec<InputPrompt>,
}

/// Typed outcome of the prepare-run call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
	/// The program compiled; an execution channel is waiting.
	Ready {
		/// Opaque run session token.
		run_id: String,
		/// Address of the per-run execution channel.
		channel_address: String,
		/// Transpiled program text.
		artifact: Option<String>,
	},
	/// The program reads runtime input that must be collected first.
	InputRequired {
		/// Prompts to surface to the user.
		prompts: Vec<InputPrompt>,
	},
	/// Preparation failed in some pipeline phase.
	Failed {
		/// Phase that failed (`"lexical"`, `"syntax"`, `"semantic"`, ...).
		phase: Option<String>,
		/// Human-readable error messages.
		errors: Vec<String>,
		/// Transpiled program text, when the pipeline got that far.
		artifact: Option<String>,
	},
}

impl PrepareResponse {
	/// Collapse the wire shape into the typed outcome.
	pub fn into_outcome(self) -> PrepareOutcome {
		if self.status.as_deref() == Some("input_required") {
			return PrepareOutcome::InputRequired {
				prompts: self.prompts,
			};
		}
		match (self.success, self.run_id, self.channel_address) {
			(true, Some(run_id), Some(channel_address)) => PrepareOutcome::Ready {
				run_id,
				channel_address,
				artifact: self.artifact,
			},
			_ => PrepareOutcome::Failed {
				phase: self.phase,
				errors: self.errors,
				artifact: self.artifact,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ready_response_decodes_upstream_names() {
		let raw = r#"{"success":true,"runId":"r1","websocketUrl":"ws://h/ws/run/r1","transpiledCode":"int main(){}"}"#;
		let outcome = crate::decode::<PrepareResponse>(raw).unwrap().into_outcome();
		assert_eq!(
			outcome,
			PrepareOutcome::Ready {
				run_id: "r1".into(),
				channel_address: "ws://h/ws/run/r1".into(),
				artifact: Some("int main(){}".into()),
			}
		);
	}

	#[test]
	fn input_required_wins_over_success_flag() {
		let raw = r#"{"status":"input_required","prompts":[{"variableName":"x","promptText":"x?","line":3,"variableType":"nt"}]}"#;
		let outcome = crate::decode::<PrepareResponse>(raw).unwrap().into_outcome();
		let PrepareOutcome::InputRequired { prompts } = outcome else {
			panic!("wrong outcome");
		};
		assert_eq!(prompts[0].variable_name, "x");
		assert_eq!(prompts[0].line, 3);
	}

	#[test]
	fn failure_keeps_phase_and_artifact() {
		let raw = r#"{"success":false,"phase":"semantic","errors":["undeclared variable x"],"transpiledCode":null}"#;
		let outcome = crate::decode::<PrepareResponse>(raw).unwrap().into_outcome();
		assert_eq!(
			outcome,
			PrepareOutcome::Failed {
				phase: Some("semantic".into()),
				errors: vec!["undeclared variable x".into()],
				artifact: None,
			}
		);
	}

	#[test]
	fn success_without_channel_address_is_a_failure() {
		let raw = r#"{"success":true}"#;
		let outcome = crate::decode::<PrepareResponse>(raw).unwrap().into_outcome();
		assert!(matches!(outcome, PrepareOutcome::Failed { .. }));
	}
}
