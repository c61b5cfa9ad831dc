//! Rate-limited outbound transport shared by every retriever and the exchanger.
//!
//! One token bucket guards all calls made through a [`RateLimitedTransport`] and its clones,
//! shielding the metadata and identity endpoints (which throttle aggressively) from bursts
//! produced by many concurrent callers. Callers wait cooperatively for a permit; a cancelled
//! wait fails with [`Error::RateLimitCancelled`] and consumes nothing from the bucket.

// crates.io
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use oauth2::{AsyncHttpClient, HttpRequest, HttpResponse};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	config::RateLimitConfig,
	error::TransientError,
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::TransportErrorMapper,
	obs::Operation,
};

/// HTTP client wrapper that takes a bucket permit before every call.
pub struct RateLimitedTransport<C>
where
	C: ?Sized + TokenHttpClient,
{
	client: Arc<C>,
	limiter: Arc<DefaultDirectRateLimiter>,
}
impl<C> RateLimitedTransport<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Wraps `client` with a fresh bucket sized by `limits`.
	pub fn new(client: impl Into<Arc<C>>, limits: &RateLimitConfig) -> Self {
		let quota = Quota::per_second(limits.per_second).allow_burst(limits.burst);

		Self { client: client.into(), limiter: Arc::new(RateLimiter::direct(quota)) }
	}

	/// Underlying HTTP client.
	pub fn client(&self) -> &Arc<C> {
		&self.client
	}

	/// Waits for one permit, failing with [`Error::RateLimitCancelled`] if `cancel` fires first.
	pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
		if cancel.is_cancelled() {
			return Err(Error::RateLimitCancelled);
		}

		tokio::select! {
			biased;
			() = cancel.cancelled() => Err(Error::RateLimitCancelled),
			() = self.limiter.until_ready() => Ok(()),
		}
	}

	/// Takes a permit, then drives `call` to completion unless `cancel` fires.
	///
	/// `call` is not polled before the permit is granted. Cancellation while it is in flight
	/// drops it and fails with [`Error::Cancelled`].
	pub async fn throttle<T, Fut>(&self, cancel: &CancellationToken, call: Fut) -> Result<T>
	where
		Fut: Future<Output = Result<T>>,
	{
		self.acquire(cancel).await?;

		tokio::select! {
			biased;
			() = cancel.cancelled() => Err(Error::Cancelled),
			result = call => result,
		}
	}

	/// Sends a prepared request, mapping transport failures through `mapper`.
	///
	/// Any HTTP status is returned as a response; callers decide which statuses are errors.
	pub(crate) async fn send<M>(
		&self,
		operation: Operation,
		request: HttpRequest,
		mapper: &M,
		cancel: &CancellationToken,
	) -> Result<(HttpResponse, ResponseMetadata)>
	where
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let slot = ResponseMetadataSlot::default();
		let handle = self.client.with_metadata(slot.clone());
		let response = self
			.throttle(cancel, async {
				handle
					.call(request)
					.await
					.map_err(|e| mapper.map_transport_error(operation, slot.take().as_ref(), e))
			})
			.await?;

		Ok((response, slot.take().unwrap_or_default()))
	}
}
impl<C> Clone for RateLimitedTransport<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn clone(&self) -> Self {
		Self { client: Arc::clone(&self.client), limiter: Arc::clone(&self.limiter) }
	}
}
impl<C> Debug for RateLimitedTransport<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimitedTransport").finish_non_exhaustive()
	}
}

/// Lossy UTF-8 view of a response body, surfaced verbatim in errors.
pub(crate) fn body_text(response: &HttpResponse) -> String {
	String::from_utf8_lossy(response.body()).into_owned()
}

/// Decodes a JSON response body, reporting the failing field path on error.
pub(crate) fn parse_json<T>(operation: Operation, response: &HttpResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(response.body());

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
		TransientError::ResponseParse {
			operation,
			source,
			status: Some(response.status().as_u16()),
		}
		.into()
	})
}
