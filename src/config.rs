//! Endpoint, audience, cache, and rate-limit settings for the retrievers and the exchanger.
//!
//! The control-plane audience is the one process-wide knob sourced from the environment:
//! [`AUDIENCE_ENV`] is read once, on first use, and every default configuration built
//! afterwards observes the same value.

// std
use std::{num::NonZeroU32, path::PathBuf, sync::OnceLock};
// self
use crate::{_prelude::*, auth::TenantId, error::ConfigError};

/// Environment variable that overrides the control-plane audience.
pub const AUDIENCE_ENV: &str = "ARM_RESOURCE";
/// Control-plane audience used when [`AUDIENCE_ENV`] is unset or blank.
pub const DEFAULT_AUDIENCE: &str = "https://management.azure.com/";
/// Node-local instance metadata token endpoint.
pub const DEFAULT_METADATA_ENDPOINT: &str =
	"http://169.254.169.254/metadata/identity/oauth2/token";
/// Metadata protocol version pinned by the retriever.
pub const METADATA_API_VERSION: &str = "2018-02-01";
/// Default identity-provider authority for federated exchanges.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/";
/// Token path below the authority; `{tenant}` is substituted per request.
pub const DEFAULT_TOKEN_PATH: &str = "{tenant}/oauth2/v2.0/token";
/// Projected service-account token mounted for workload identity.
pub const DEFAULT_ASSERTION_FILE: &str = "/var/run/secrets/azure/tokens/azure-identity-token";
/// Lifetime of cached managed-identity tokens.
pub const DEFAULT_CACHE_TTL: Duration = Duration::minutes(10);

const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Process-wide control-plane audience, honoring [`AUDIENCE_ENV`].
pub fn control_plane_audience() -> &'static str {
	static AUDIENCE: OnceLock<String> = OnceLock::new();

	AUDIENCE.get_or_init(|| resolve_audience(std::env::var(AUDIENCE_ENV).ok()))
}

fn resolve_audience(value: Option<String>) -> String {
	value
		.map(|value| value.trim().to_owned())
		.filter(|value| !value.is_empty())
		.unwrap_or_else(|| DEFAULT_AUDIENCE.to_owned())
}

/// Settings for the managed-identity retriever.
#[derive(Clone, Debug)]
pub struct ManagedIdentityConfig {
	/// Metadata token endpoint.
	pub endpoint: String,
	/// Audience requested from the metadata endpoint.
	pub audience: String,
	/// Lifetime of cached tokens, measured from acquisition.
	pub cache_ttl: Duration,
}
impl ManagedIdentityConfig {
	/// Overrides the metadata endpoint.
	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();

		self
	}

	/// Overrides the requested audience.
	pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = audience.into();

		self
	}

	/// Overrides the cache lifetime.
	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = ttl;

		self
	}

	pub(crate) fn endpoint_url(&self) -> Result<Url, ConfigError> {
		Url::parse(&self.endpoint).map_err(|e| ConfigError::invalid_endpoint(&self.endpoint, e))
	}
}
impl Default for ManagedIdentityConfig {
	fn default() -> Self {
		Self {
			endpoint: DEFAULT_METADATA_ENDPOINT.into(),
			audience: control_plane_audience().into(),
			cache_ttl: DEFAULT_CACHE_TTL,
		}
	}
}

/// Settings for the workload-identity retriever.
#[derive(Clone, Debug)]
pub struct WorkloadIdentityConfig {
	/// Identity-provider authority.
	pub authority: String,
	/// Token path below the authority, containing a `{tenant}` placeholder.
	pub token_path: String,
	/// Federated assertion file.
	pub assertion_file: PathBuf,
	/// Control-plane audience; the requested scope is `<audience>/.default`.
	pub audience: String,
}
impl WorkloadIdentityConfig {
	/// Overrides the authority.
	pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
		self.authority = authority.into();

		self
	}

	/// Overrides the token path template.
	pub fn with_token_path(mut self, token_path: impl Into<String>) -> Self {
		self.token_path = token_path.into();

		self
	}

	/// Overrides the assertion file location.
	pub fn with_assertion_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.assertion_file = path.into();

		self
	}

	/// Overrides the control-plane audience.
	pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = audience.into();

		self
	}

	/// Scope requested from the identity provider.
	pub fn default_scope(&self) -> String {
		format!("{}/.default", self.audience.trim_end_matches('/'))
	}

	/// Per-tenant token endpoint.
	pub fn token_endpoint(&self, tenant: &TenantId) -> Result<Url, ConfigError> {
		let path = self.token_path.replace(TENANT_PLACEHOLDER, tenant);
		let authority = if self.authority.ends_with('/') {
			self.authority.clone()
		} else {
			format!("{}/", self.authority)
		};
		let endpoint = format!("{authority}{}", path.trim_start_matches('/'));

		Url::parse(&endpoint).map_err(|e| ConfigError::invalid_endpoint(endpoint, e))
	}
}
impl Default for WorkloadIdentityConfig {
	fn default() -> Self {
		Self {
			authority: DEFAULT_AUTHORITY.into(),
			token_path: DEFAULT_TOKEN_PATH.into(),
			assertion_file: DEFAULT_ASSERTION_FILE.into(),
			audience: control_plane_audience().into(),
		}
	}
}

/// Settings for the registry token exchanger.
#[derive(Clone, Debug)]
pub struct ExchangeConfig {
	/// URL scheme used to reach registries.
	pub scheme: String,
}
impl ExchangeConfig {
	/// Overrides the scheme, e.g. `http` for local registries.
	pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
		self.scheme = scheme.into();

		self
	}
}
impl Default for ExchangeConfig {
	fn default() -> Self {
		Self { scheme: "https".into() }
	}
}

/// Token-bucket settings shared by every call through one transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
	/// Sustained refill rate.
	pub per_second: NonZeroU32,
	/// Bucket capacity.
	pub burst: NonZeroU32,
}
impl RateLimitConfig {
	/// Builds a configuration, clamping zero values to one.
	pub fn new(per_second: u32, burst: u32) -> Self {
		Self {
			per_second: NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN),
			burst: NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN),
		}
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self::new(1, 5)
	}
}
