//! Workload-identity retriever trading a mounted federated assertion for a control-plane token.

// std
use std::io::{Error as IoError, ErrorKind};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, TenantId},
	config::WorkloadIdentityConfig,
	http::TokenHttpClient,
	oauth::{self, AssertionGrant, TransportErrorMapper},
	obs::{self, Operation},
	transport::RateLimitedTransport,
};

/// Exchanges the projected service-account assertion at the identity provider.
///
/// The assertion file is re-read on every call so rotated tokens are picked up, and results
/// are not cached.
pub struct WorkloadIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	transport: RateLimitedTransport<C>,
	mapper: Arc<M>,
	config: WorkloadIdentityConfig,
}
impl<C, M> WorkloadIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a retriever over `transport`.
	pub fn new(
		transport: RateLimitedTransport<C>,
		mapper: impl Into<Arc<M>>,
		config: WorkloadIdentityConfig,
	) -> Self {
		Self { transport, mapper: mapper.into(), config }
	}

	/// Active configuration.
	pub fn config(&self) -> &WorkloadIdentityConfig {
		&self.config
	}

	/// Returns a control-plane token for the federated application `client_id` in `tenant_id`.
	pub async fn acquire_token(
		&self,
		client_id: &ClientId,
		tenant_id: &TenantId,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		obs::observe(Operation::WorkloadIdentity, "acquire_token", async {
			let assertion = self.read_assertion().await?;
			let grant = AssertionGrant {
				token_endpoint: self.config.token_endpoint(tenant_id)?,
				client_id,
				assertion,
				scope: self.config.default_scope(),
			};

			oauth::exchange_client_assertion(&self.transport, self.mapper.as_ref(), grant, cancel)
				.await
		})
		.await
	}

	async fn read_assertion(&self) -> Result<String> {
		let path = &self.config.assertion_file;
		let raw = tokio::fs::read_to_string(path)
			.await
			.map_err(|source| Error::Credential { path: path.clone(), source })?;
		let assertion = raw.trim();

		if assertion.is_empty() {
			return Err(Error::Credential {
				path: path.clone(),
				source: IoError::new(ErrorKind::InvalidData, "assertion file is empty"),
			});
		}

		Ok(assertion.to_owned())
	}
}
impl<C, M> Clone for WorkloadIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			mapper: Arc::clone(&self.mapper),
			config: self.config.clone(),
		}
	}
}
impl<C, M> Debug for WorkloadIdentityRetriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("WorkloadIdentityRetriever")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}
