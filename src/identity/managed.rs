//! Managed-identity retriever backed by the node-local metadata endpoint.

// crates.io
use oauth2::{
	HttpRequest,
	http::{Method, StatusCode, header::ACCEPT},
};
// self
use crate::{
	_prelude::*,
	auth::AccessToken,
	cache::TokenCache,
	clock::Clock,
	config::{METADATA_API_VERSION, ManagedIdentityConfig},
	error::{ConfigError, TransientError},
	http::TokenHttpClient,
	identity::ManagedIdentitySelector,
	oauth::TransportErrorMapper,
	obs::{self, Operation},
	transport::{self, RateLimitedTransport},
};

const METADATA_HEADER: &str = "Metadata";

#[derive(Deserialize)]
struct MetadataTokenResponse {
	access_token: String,
}

/// Acquires control-plane tokens from the metadata endpoint and caches them per identity.
///
/// The cache belongs to this instance; clones share it.
pub struct ManagedIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	transport: RateLimitedTransport<C>,
	mapper: Arc<M>,
	config: ManagedIdentityConfig,
	cache: TokenCache,
}
impl<C, M> ManagedIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a retriever whose cache follows the wall clock.
	pub fn new(
		transport: RateLimitedTransport<C>,
		mapper: impl Into<Arc<M>>,
		config: ManagedIdentityConfig,
	) -> Self {
		let cache = TokenCache::new(config.cache_ttl);

		Self { transport, mapper: mapper.into(), config, cache }
	}

	/// Builds a retriever whose cache follows `clock`.
	pub fn with_clock(
		transport: RateLimitedTransport<C>,
		mapper: impl Into<Arc<M>>,
		config: ManagedIdentityConfig,
		clock: Arc<dyn Clock>,
	) -> Self {
		let cache = TokenCache::with_clock(config.cache_ttl, clock);

		Self { transport, mapper: mapper.into(), config, cache }
	}

	/// Active configuration.
	pub fn config(&self) -> &ManagedIdentityConfig {
		&self.config
	}

	/// Token cache owned by this retriever.
	pub fn cache(&self) -> &TokenCache {
		&self.cache
	}

	/// Returns a control-plane token for `selector`, serving from the cache while it is live.
	///
	/// Failures are never cached; the next call goes back to the endpoint.
	pub async fn acquire_token(
		&self,
		selector: &ManagedIdentitySelector,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		obs::observe(Operation::ManagedIdentity, "acquire_token", async {
			let key = selector.cache_key();

			if let Some(token) = self.cache.get(&key) {
				return Ok(token);
			}

			let token = self.fetch(selector, cancel).await?;

			self.cache.insert(key, token.clone());

			Ok(token)
		})
		.await
	}

	async fn fetch(
		&self,
		selector: &ManagedIdentitySelector,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		const OPERATION: Operation = Operation::ManagedIdentity;

		let request = self.request(selector)?;
		let (response, meta) =
			self.transport.send(OPERATION, request, self.mapper.as_ref(), cancel).await?;

		if response.status() != StatusCode::OK {
			return Err(Error::Metadata {
				status: response.status().as_u16(),
				body: transport::body_text(&response),
				retry_after: meta.retry_after,
			});
		}

		let parsed = transport::parse_json::<MetadataTokenResponse>(OPERATION, &response)?;

		if parsed.access_token.is_empty() {
			return Err(TransientError::Endpoint {
				operation: OPERATION,
				message: "response carried an empty access_token".into(),
				status: meta.status,
				retry_after: meta.retry_after,
			}
			.into());
		}

		Ok(AccessToken::new(parsed.access_token))
	}

	fn request(&self, selector: &ManagedIdentitySelector) -> Result<HttpRequest, ConfigError> {
		let mut url = self.config.endpoint_url()?;

		url.query_pairs_mut()
			.append_pair(selector.query_param(), selector.value())
			.append_pair("resource", &self.config.audience)
			.append_pair("api-version", METADATA_API_VERSION);

		let request = oauth2::http::Request::builder()
			.method(Method::GET)
			.uri(url.as_str())
			.header(METADATA_HEADER, "true")
			.header(ACCEPT, "application/json")
			.body(Vec::new())?;

		Ok(request)
	}
}
impl<C, M> Clone for ManagedIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			mapper: Arc::clone(&self.mapper),
			config: self.config.clone(),
			cache: self.cache.clone(),
		}
	}
}
impl<C, M> Debug for ManagedIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ManagedIdentityRetriever")
			.field("config", &self.config)
			.field("cache", &self.cache)
			.finish_non_exhaustive()
	}
}
