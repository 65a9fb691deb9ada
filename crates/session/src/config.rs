//! Session coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for debouncing, reconnection, and connect deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
	/// Quiet period after the last edit before an analysis request is sent.
	#[serde(default = "default_debounce_ms")]
	pub debounce_ms: u64,
	/// Analysis channel reconnect attempts before giving up.
	#[serde(default = "default_reconnect_attempts")]
	pub reconnect_attempts: u32,
	/// Delay between analysis channel reconnect attempts.
	#[serde(default = "default_reconnect_delay_ms")]
	pub reconnect_delay_ms: u64,
	/// Deadline for opening the execution channel.
	#[serde(default = "default_connect_timeout_secs")]
	pub connect_timeout_secs: u64,
}

fn default_debounce_ms() -> u64 {
	600
}

fn default_reconnect_attempts() -> u32 {
	5
}

fn default_reconnect_delay_ms() -> u64 {
	1000
}

fn default_connect_timeout_secs() -> u64 {
	10
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			debounce_ms: default_debounce_ms(),
			reconnect_attempts: default_reconnect_attempts(),
			reconnect_delay_ms: default_reconnect_delay_ms(),
			connect_timeout_secs: default_connect_timeout_secs(),
		}
	}
}

impl SessionConfig {
	/// Debounce quiet period.
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	/// Delay between reconnect attempts.
	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_delay_ms)
	}

	/// Execution channel connect deadline.
	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connect_timeout_secs)
	}
}
