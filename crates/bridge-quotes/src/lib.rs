//! Quote aggregation and route selection.
//!
//! Fans a quote request out to the configured solver backends and selects
//! one candidate with a pluggable strategy. Quotes are advisory: the service
//! reports what backends offered and when, and the execution path is
//! responsible for enforcing each quote's time limit before committing
//! funds.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use bridge_types::{Quote, QuoteRequest, Result};

pub mod implementations {
	pub mod http;
}
mod strategies;

pub use strategies::{
	CostOptimized, DefaultStrategy, PerformanceOptimized, ReliabilityOptimized, SelectionStrategy,
};

/// One solver/bridge backend able to price requests.
#[async_trait]
pub trait QuoteBackend: Send + Sync {
	fn name(&self) -> &str;

	/// Prices the request. `Ok(None)` means this backend cannot service it;
	/// that is not an error.
	async fn quote(&self, request: &QuoteRequest) -> Result<Option<Quote>>;
}

/// Aggregating quote service.
pub struct QuoteService {
	backends: Vec<Box<dyn QuoteBackend>>,
	strategy: Box<dyn SelectionStrategy>,
}

impl QuoteService {
	pub fn new(backends: Vec<Box<dyn QuoteBackend>>, strategy: Box<dyn SelectionStrategy>) -> Self {
		Self { backends, strategy }
	}

	/// Queries all backends concurrently and selects one quote.
	///
	/// Backend errors are logged and skipped; `Ok(None)` is returned when no
	/// backend can service the request, and the caller falls back or
	/// surfaces "unavailable".
	pub async fn get_quote(&self, request: &QuoteRequest) -> Result<Option<Quote>> {
		let futures = self
			.backends
			.iter()
			.map(|backend| async move { (backend.name().to_string(), backend.quote(request).await) });

		let mut candidates = Vec::new();
		for (name, outcome) in join_all(futures).await {
			match outcome {
				Ok(Some(quote)) => candidates.push(quote),
				Ok(None) => debug!(backend = %name, "backend cannot service request"),
				Err(e) => warn!(backend = %name, error = %e, "quote backend failed"),
			}
		}

		Ok(self.strategy.select(request, candidates))
	}
}
