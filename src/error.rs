//! Broker-level error types shared across retrievers, the exchanger, and the facade.

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	auth::{ClaimError, IdentifierError},
	obs::Operation,
};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token claims could not be extracted.
	#[error(transparent)]
	Claim(#[from] ClaimError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Metadata endpoint answered with a non-success status.
	#[error("Metadata endpoint returned status {status}: {body}")]
	Metadata {
		/// HTTP status code returned by the endpoint.
		status: u16,
		/// Response body, verbatim.
		body: String,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Registry exchange endpoint answered with a non-success status.
	#[error("Registry exchange returned status {status}: {body}")]
	Exchange {
		/// HTTP status code returned by the registry.
		status: u16,
		/// Response body, verbatim.
		body: String,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Federated assertion file could not be read.
	#[error("Failed to read the federated assertion from {}.", path.display())]
	Credential {
		/// Assertion file location.
		path: PathBuf,
		/// Underlying read failure.
		#[source]
		source: std::io::Error,
	},
	/// Identity provider rejected the assertion exchange.
	#[error("Identity provider rejected the assertion exchange: {reason}.")]
	Auth {
		/// Provider-supplied reason string.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Caller cancelled while waiting for a rate-limit permit.
	#[error("Cancelled while waiting for a rate-limit permit.")]
	RateLimitCancelled,
	/// Caller cancelled while the upstream call was in flight.
	#[error("Cancelled while the upstream call was in flight.")]
	Cancelled,
	/// Failure annotated with the facade operation that produced it.
	#[error("{operation} failed: {source}")]
	Operation {
		/// Operation that failed.
		operation: Operation,
		/// Original failure.
		#[source]
		source: Box<Error>,
	},
}
impl Error {
	/// Wraps `self` with the operation that produced it.
	pub fn in_operation(self, operation: Operation) -> Self {
		Self::Operation { operation, source: Box::new(self) }
	}

	/// Returns the innermost error, looking through [`Error::Operation`] layers.
	pub fn root_cause(&self) -> &Error {
		let mut current = self;

		while let Self::Operation { source, .. } = current {
			current = source;
		}

		current
	}

	/// Returns `true` when retrying without changing the input cannot succeed.
	pub fn is_permanent(&self) -> bool {
		matches!(self.root_cause(), Self::Config(_) | Self::Claim(_))
	}
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured or derived endpoint is not a valid URL.
	#[error("Endpoint `{endpoint}` is invalid.")]
	InvalidEndpoint {
		/// Offending endpoint text.
		endpoint: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Registry host has no hostname component.
	#[error("Registry host `{host}` has no hostname.")]
	InvalidRegistryHost {
		/// Offending host text.
		host: String,
	},
	/// Identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),

	/// Neither a client identifier nor a resource identifier was supplied.
	#[error("Either a client identifier or a resource identifier is required.")]
	MissingSelector,
	/// Both a client identifier and a resource identifier were supplied.
	#[error("Only one of client identifier and resource identifier may be supplied.")]
	ConflictingSelectors,
	/// Facade was asked for a flow it was not constructed with.
	#[error("Authorizer was built for {configured} and cannot serve {requested}.")]
	RetrieverMismatch {
		/// Flow the authorizer holds.
		configured: &'static str,
		/// Flow the caller requested.
		requested: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	pub(crate) fn invalid_endpoint(endpoint: impl Display, source: url::ParseError) -> Self {
		Self::InvalidEndpoint { endpoint: endpoint.to_string(), source }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Upstream returned an unexpected but non-fatal response.
	#[error("{operation} endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Operation whose endpoint misbehaved.
		operation: Operation,
		/// Provider- or broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Upstream responded with JSON that could not be parsed.
	#[error("{operation} endpoint returned malformed JSON.")]
	ResponseParse {
		/// Operation whose response failed to parse.
		operation: Operation,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling an upstream endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling an upstream endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn operation_context_preserves_root_cause() {
		let inner = Error::Metadata { status: 404, body: "not found".into(), retry_after: None };
		let err = inner.in_operation(Operation::ManagedIdentity);

		assert!(err.to_string().contains("404"));
		assert!(err.to_string().contains("managed_identity"));
		assert!(matches!(err.root_cause(), Error::Metadata { status: 404, .. }));

		let source = StdError::source(&err).expect("Operation errors must expose their cause.");

		assert!(source.to_string().contains("not found"));
	}

	#[test]
	fn permanence_follows_the_root_cause() {
		let config = Error::from(ConfigError::MissingSelector)
			.in_operation(Operation::AcquireWithManagedIdentity);
		let claim = Error::from(ClaimError::Missing { claim: "tid" });
		let cancelled = Error::RateLimitCancelled.in_operation(Operation::RegistryExchange);

		assert!(config.is_permanent());
		assert!(claim.is_permanent());
		assert!(!cancelled.is_permanent());
		assert!(
			!Error::Exchange { status: 503, body: String::new(), retry_after: None }
				.is_permanent()
		);
	}
}
