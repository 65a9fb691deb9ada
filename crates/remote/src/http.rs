//! HTTP client for the synchronous compiler services.

use std::collections::HashMap;

use async_trait::async_trait;
use kiln_protocol::{PrepareOutcome, PrepareResponse, RunWithInputRequest, SemanticOutcome};
use kiln_session::{Error, PrepareService, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

#[derive(Serialize)]
struct CodeBody<'a> {
	code: &'a str,
}

/// [`PrepareService`] implementation over the compiler's HTTP API.
pub struct HttpCompilerService {
	http: reqwest::Client,
	base: Url,
}

impl HttpCompilerService {
	/// Client for the service rooted at `base`.
	pub fn new(base: Url) -> Self {
		Self::with_client(reqwest::Client::new(), base)
	}

	/// Like [`new`](Self::new) with a caller-configured HTTP client.
	pub fn with_client(http: reqwest::Client, base: Url) -> Self {
		Self { http, base }
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		self.base
			.join(path)
			.map_err(|err| Error::Service(format!("bad endpoint {path}: {err}")))
	}

	async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: Serialize + Sync,
		R: DeserializeOwned,
	{
		let url = self.endpoint(path)?;
		debug!(%url, "compiler service request");
		let response = self
			.http
			.post(url)
			.json(body)
			.send()
			.await
			.map_err(|err| Error::Transport(err.to_string()))?
			.error_for_status()
			.map_err(|err| Error::Service(err.to_string()))?;
		response
			.json()
			.await
			.map_err(|err| Error::Service(format!("malformed response from {path}: {err}")))
	}
}

#[async_trait]
impl PrepareService for HttpCompilerService {
	async fn semantic_check(&self, source: &str) -> Result<SemanticOutcome> {
		self.post_json("/api/semantic", &CodeBody { code: source })
			.await
	}

	async fn prepare(&self, source: &str) -> Result<PrepareOutcome> {
		let response: PrepareResponse = self
			.post_json("/api/run/prepare", &CodeBody { code: source })
			.await?;
		Ok(response.into_outcome())
	}

	async fn prepare_with_inputs(
		&self,
		source: &str,
		inputs: &HashMap<String, String>,
	) -> Result<PrepareOutcome> {
		let body = RunWithInputRequest {
			code: source.to_string(),
			inputs: inputs.clone(),
		};
		let response: PrepareResponse = self
			.post_json("/api/run/prepare-with-input", &body)
			.await?;
		Ok(response.into_outcome())
	}
}
