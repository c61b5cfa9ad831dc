//! Exchange a cloud workload identity for short-lived container registry credentials.
//!
//! The crate acquires a control-plane token through either the node-local managed-identity
//! endpoint or a federated workload-identity assertion exchange, then trades it for a
//! registry-scoped refresh token. Every outbound call shares one token-bucket limiter, and
//! every failure surfaces as a structured [`error::Error`] so the caller owns retry policy.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authorizer;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod identity;
pub mod oauth;
pub mod obs;
pub mod transport;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests.

	pub use crate::_prelude::*;

	// crates.io
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use crate::{
		clock::Clock,
		config::RateLimitConfig,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		transport::RateLimitedTransport,
	};

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Rate-limited transport over [`test_reqwest_http_client`] with a burst large enough
	/// that tests never wait for permits unless they configure otherwise.
	pub fn test_transport() -> RateLimitedTransport<ReqwestHttpClient> {
		test_transport_with_limits(RateLimitConfig::new(100, 100))
	}

	/// Rate-limited transport over [`test_reqwest_http_client`] with explicit limits.
	pub fn test_transport_with_limits(
		limits: RateLimitConfig,
	) -> RateLimitedTransport<ReqwestHttpClient> {
		RateLimitedTransport::new(test_reqwest_http_client(), &limits)
	}

	/// Default reqwest error mapper wrapped for sharing.
	pub fn test_mapper() -> Arc<ReqwestTransportErrorMapper> {
		Arc::new(ReqwestTransportErrorMapper)
	}

	/// Encodes an unsigned JWT carrying `claims` as its payload.
	pub fn unsigned_jwt(claims: serde_json::Value) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

		format!("{header}.{payload}.c2lnbmF0dXJl")
	}

	/// Clock that only moves when a test advances it.
	#[derive(Debug)]
	pub struct ManualClock(Mutex<OffsetDateTime>);
	impl ManualClock {
		/// Starts the clock at `instant`.
		pub fn starting_at(instant: OffsetDateTime) -> Self {
			Self(Mutex::new(instant))
		}

		/// Moves the clock forward by `delta`.
		pub fn advance(&self, delta: Duration) {
			*self.0.lock() += delta;
		}
	}
	impl Default for ManualClock {
		fn default() -> Self {
			Self::starting_at(OffsetDateTime::UNIX_EPOCH + Duration::days(20_000))
		}
	}
	impl Clock for ManualClock {
		fn now(&self) -> OffsetDateTime {
			*self.0.lock()
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
