//! Optional observability helpers for broker operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `registry_token_broker.op` with the `op`
//!   and `stage` (call site) fields, plus `debug!` events for cache lookups.
//! - Enable `metrics` to increment the `registry_token_broker_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`, and the
//!   `registry_token_broker_cache_total` counter labeled by `result`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
	/// Metadata-endpoint token acquisition.
	ManagedIdentity,
	/// Federated assertion exchange.
	WorkloadIdentity,
	/// Registry refresh-token exchange.
	RegistryExchange,
	/// Facade operation backed by the managed-identity retriever.
	AcquireWithManagedIdentity,
	/// Facade operation backed by the workload-identity retriever.
	AcquireWithWorkloadIdentity,
}
impl Operation {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::ManagedIdentity => "managed_identity",
			Operation::WorkloadIdentity => "workload_identity",
			Operation::RegistryExchange => "registry_exchange",
			Operation::AcquireWithManagedIdentity => "acquire_with_managed_identity",
			Operation::AcquireWithWorkloadIdentity => "acquire_with_workload_identity",
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to a broker helper.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Result of a token cache lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheLookup {
	/// A live entry was returned.
	Hit,
	/// No entry existed for the key.
	Miss,
	/// An entry existed but had expired and was evicted.
	Expired,
}
impl CacheLookup {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CacheLookup::Hit => "hit",
			CacheLookup::Miss => "miss",
			CacheLookup::Expired => "expired",
		}
	}
}

/// Runs `fut` inside an [`OpSpan`] and records attempt/success/failure around it.
pub(crate) async fn observe<T, Fut>(
	operation: Operation,
	stage: &'static str,
	fut: Fut,
) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = OpSpan::new(operation, stage);

	record_op_outcome(operation, OpOutcome::Attempt);

	let result = span.instrument(fut).await;

	match &result {
		Ok(_) => record_op_outcome(operation, OpOutcome::Success),
		Err(_) => record_op_outcome(operation, OpOutcome::Failure),
	}

	result
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn labels_are_stable() {
		assert_eq!(Operation::RegistryExchange.to_string(), "registry_exchange");
		assert_eq!(OpOutcome::Failure.to_string(), "failure");
		assert_eq!(CacheLookup::Expired.as_str(), "expired");
	}
}
