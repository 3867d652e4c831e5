//! Quote selection strategies.

use bridge_types::{Quote, QuoteRequest};

/// Picks one quote out of the candidates a request produced.
pub trait SelectionStrategy: Send + Sync {
	fn name(&self) -> &str;

	/// Returns the winning quote, or `None` when there are no candidates.
	fn select(&self, request: &QuoteRequest, candidates: Vec<Quote>) -> Option<Quote>;
}

fn cheapest(candidates: Vec<Quote>) -> Option<Quote> {
	candidates.into_iter().min_by_key(|q| q.fee)
}

fn fastest(candidates: Vec<Quote>) -> Option<Quote> {
	candidates.into_iter().min_by_key(|q| q.eta_secs)
}

fn most_reliable(candidates: Vec<Quote>) -> Option<Quote> {
	// Reliability is a plain fraction; ties go to the cheaper quote.
	candidates.into_iter().max_by(|a, b| {
		a.reliability
			.total_cmp(&b.reliability)
			.then(b.fee.cmp(&a.fee))
	})
}

/// Amount-aware default: large transfers prefer the most reliable solver,
/// small transfers prefer the fastest.
pub struct DefaultStrategy {
	amount_threshold: u128,
}

impl DefaultStrategy {
	pub fn new(amount_threshold: u128) -> Self {
		Self { amount_threshold }
	}
}

impl SelectionStrategy for DefaultStrategy {
	fn name(&self) -> &str {
		"default"
	}

	fn select(&self, request: &QuoteRequest, candidates: Vec<Quote>) -> Option<Quote> {
		if request.source_amount >= self.amount_threshold {
			most_reliable(candidates)
		} else {
			fastest(candidates)
		}
	}
}

/// Lowest fee wins.
pub struct CostOptimized;

impl SelectionStrategy for CostOptimized {
	fn name(&self) -> &str {
		"cost"
	}

	fn select(&self, _request: &QuoteRequest, candidates: Vec<Quote>) -> Option<Quote> {
		cheapest(candidates)
	}
}

/// Shortest estimated completion time wins.
pub struct PerformanceOptimized;

impl SelectionStrategy for PerformanceOptimized {
	fn name(&self) -> &str {
		"performance"
	}

	fn select(&self, _request: &QuoteRequest, candidates: Vec<Quote>) -> Option<Quote> {
		fastest(candidates)
	}
}

/// Highest historical success rate wins.
pub struct ReliabilityOptimized;

impl SelectionStrategy for ReliabilityOptimized {
	fn name(&self) -> &str {
		"reliability"
	}

	fn select(&self, _request: &QuoteRequest, candidates: Vec<Quote>) -> Option<Quote> {
		most_reliable(candidates)
	}
}
