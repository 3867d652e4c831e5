//! HTTP quote backend.
//!
//! Posts the quote request to a solver's quoting endpoint. A 404 or an empty
//! body means the solver cannot service the route, which is reported as
//! `Ok(None)` rather than an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bridge_types::{now_secs, BridgeError, Quote, QuoteRequest, Result};

use crate::QuoteBackend;

pub struct HttpQuoteBackend {
	name: String,
	client: reqwest::Client,
	base_url: String,
}

impl HttpQuoteBackend {
	pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			client: reqwest::Client::new(),
			base_url: base_url.into(),
		}
	}
}

#[derive(Serialize)]
struct QuoteRequestBody<'a> {
	source_chain: &'a str,
	source_asset: &'a str,
	source_amount: String,
	destination_chain_id: u64,
	destination_address: Option<String>,
}

#[derive(Deserialize)]
struct QuoteResponseBody {
	fee: String,
	destination_amount: String,
	eta_secs: u64,
	#[serde(default = "default_reliability")]
	reliability: f64,
	time_limit_secs: u64,
}

fn default_reliability() -> f64 {
	0.5
}

fn parse_amount(s: &str) -> Result<u128> {
	s.parse()
		.map_err(|e| BridgeError::Network(format!("invalid amount in quote response: {}", e)))
}

#[async_trait]
impl QuoteBackend for HttpQuoteBackend {
	fn name(&self) -> &str {
		&self.name
	}

	async fn quote(&self, request: &QuoteRequest) -> Result<Option<Quote>> {
		let body = QuoteRequestBody {
			source_chain: &request.source_chain,
			source_asset: &request.source_asset,
			source_amount: request.source_amount.to_string(),
			destination_chain_id: request.destination_chain_id,
			destination_address: request.destination_address.as_ref().map(|a| a.to_string()),
		};

		let response = self
			.client
			.post(format!("{}/v1/quote", self.base_url))
			.json(&body)
			.send()
			.await
			.map_err(|e| BridgeError::Network(format!("quote backend unreachable: {}", e)))?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !response.status().is_success() {
			return Err(BridgeError::Network(format!(
				"quote backend returned {}",
				response.status()
			)));
		}

		let parsed: Option<QuoteResponseBody> = response
			.json()
			.await
			.map_err(|e| BridgeError::Network(format!("invalid quote response: {}", e)))?;

		let Some(parsed) = parsed else {
			return Ok(None);
		};

		Ok(Some(Quote {
			solver: self.name.clone(),
			fee: parse_amount(&parsed.fee)?,
			destination_amount: parse_amount(&parsed.destination_amount)?,
			eta_secs: parsed.eta_secs,
			reliability: parsed.reliability,
			time_limit_secs: parsed.time_limit_secs,
			quoted_at: now_secs(),
		}))
	}
}
