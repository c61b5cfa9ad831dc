//! Facade composing one control-plane retriever with the registry exchanger.
//!
//! An [`Authorizer`] is built for exactly one credential flow. Both of its operations run the
//! retriever first and only call the registry when a control-plane token was obtained, so a
//! failed retrieval never reaches the exchange endpoint. Every outbound call made by the
//! retriever and the exchanger draws from the same rate-limit bucket.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, TenantId},
	config::{ExchangeConfig, ManagedIdentityConfig, RateLimitConfig, WorkloadIdentityConfig},
	error::ConfigError,
	exchange::RegistryExchanger,
	http::TokenHttpClient,
	identity::{
		CredentialSpec, ManagedIdentityRetriever, ManagedIdentitySelector, RetrieverKind,
		WorkloadIdentityRetriever,
	},
	oauth::TransportErrorMapper,
	obs::{self, Operation},
	transport::RateLimitedTransport,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Authorizer specialized for the crate's default reqwest transport stack.
pub type ReqwestAuthorizer = Authorizer<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Settings for the retriever an [`Authorizer`] should build.
#[derive(Clone, Debug)]
pub enum RetrieverConfig {
	/// Build a [`ManagedIdentityRetriever`].
	ManagedIdentity(ManagedIdentityConfig),
	/// Build a [`WorkloadIdentityRetriever`].
	WorkloadIdentity(WorkloadIdentityConfig),
}
impl From<ManagedIdentityConfig> for RetrieverConfig {
	fn from(value: ManagedIdentityConfig) -> Self {
		Self::ManagedIdentity(value)
	}
}
impl From<WorkloadIdentityConfig> for RetrieverConfig {
	fn from(value: WorkloadIdentityConfig) -> Self {
		Self::WorkloadIdentity(value)
	}
}

/// Control-plane retriever held by an [`Authorizer`].
pub enum Retriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Metadata-endpoint flow.
	ManagedIdentity(ManagedIdentityRetriever<C, M>),
	/// Federated assertion flow.
	WorkloadIdentity(WorkloadIdentityRetriever<C, M>),
}
impl<C, M> Retriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Flow this retriever serves.
	pub fn kind(&self) -> RetrieverKind {
		match self {
			Self::ManagedIdentity(_) => RetrieverKind::ManagedIdentity,
			Self::WorkloadIdentity(_) => RetrieverKind::WorkloadIdentity,
		}
	}
}
impl<C, M> From<ManagedIdentityRetriever<C, M>> for Retriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn from(value: ManagedIdentityRetriever<C, M>) -> Self {
		Self::ManagedIdentity(value)
	}
}
impl<C, M> From<WorkloadIdentityRetriever<C, M>> for Retriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn from(value: WorkloadIdentityRetriever<C, M>) -> Self {
		Self::WorkloadIdentity(value)
	}
}
impl<C, M> Clone for Retriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		match self {
			Self::ManagedIdentity(inner) => Self::ManagedIdentity(inner.clone()),
			Self::WorkloadIdentity(inner) => Self::WorkloadIdentity(inner.clone()),
		}
	}
}
impl<C, M> Debug for Retriever<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::ManagedIdentity(inner) => f.debug_tuple("ManagedIdentity").field(inner).finish(),
			Self::WorkloadIdentity(inner) =>
				f.debug_tuple("WorkloadIdentity").field(inner).finish(),
		}
	}
}

/// Turns a cloud identity into a registry refresh token.
pub struct Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	retriever: Retriever<C, M>,
	exchanger: RegistryExchanger<C, M>,
}
impl<C, M> Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an authorizer whose retriever and exchanger share one rate-limited transport
	/// over `http_client`.
	pub fn with_http_client(
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
		retriever: impl Into<RetrieverConfig>,
		exchange: ExchangeConfig,
		limits: &RateLimitConfig,
	) -> Self {
		let transport = RateLimitedTransport::new(http_client, limits);

		Self::with_transport(transport, mapper, retriever, exchange)
	}

	/// Creates an authorizer over an existing transport, sharing its rate-limit bucket.
	pub fn with_transport(
		transport: RateLimitedTransport<C>,
		mapper: impl Into<Arc<M>>,
		retriever: impl Into<RetrieverConfig>,
		exchange: ExchangeConfig,
	) -> Self {
		let mapper = mapper.into();
		let retriever = match retriever.into() {
			RetrieverConfig::ManagedIdentity(config) => Retriever::ManagedIdentity(
				ManagedIdentityRetriever::new(transport.clone(), Arc::clone(&mapper), config),
			),
			RetrieverConfig::WorkloadIdentity(config) => Retriever::WorkloadIdentity(
				WorkloadIdentityRetriever::new(transport.clone(), Arc::clone(&mapper), config),
			),
		};
		let exchanger = RegistryExchanger::new(transport, mapper, exchange);

		Self { retriever, exchanger }
	}

	/// Assembles an authorizer from prebuilt components.
	///
	/// The components should be built over clones of one transport so they share its bucket.
	pub fn from_parts(
		retriever: impl Into<Retriever<C, M>>,
		exchanger: RegistryExchanger<C, M>,
	) -> Self {
		Self { retriever: retriever.into(), exchanger }
	}

	/// Retriever held by this authorizer.
	pub fn retriever(&self) -> &Retriever<C, M> {
		&self.retriever
	}

	/// Registry exchanger held by this authorizer.
	pub fn exchanger(&self) -> &RegistryExchanger<C, M> {
		&self.exchanger
	}

	/// Acquires a control-plane token through the managed identity named by `selector`, then
	/// exchanges it at `registry_host`.
	///
	/// The exchange carries `tenant` when given, otherwise the tenant recorded in the token's
	/// claims. Tokens without readable tenant claims are exchanged without a tenant field.
	pub async fn acquire_with_managed_identity(
		&self,
		selector: &ManagedIdentitySelector,
		tenant: Option<&TenantId>,
		registry_host: &str,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		const OPERATION: Operation = Operation::AcquireWithManagedIdentity;

		obs::observe(OPERATION, "acquire", async {
			let Retriever::ManagedIdentity(retriever) = &self.retriever else {
				return Err(self.mismatch(RetrieverKind::ManagedIdentity).into());
			};
			let token = retriever.acquire_token(selector, cancel).await?;
			let claimed = match tenant {
				Some(_) => None,
				None => token.tenant_id().ok(),
			};

			self.exchanger
				.exchange_for(&token, tenant.or(claimed.as_ref()), registry_host, cancel)
				.await
		})
		.await
		.map_err(|e| e.in_operation(OPERATION))
	}

	/// Acquires a control-plane token for the federated application `client_id` in
	/// `tenant_id`, then exchanges it at `registry_host` for the same tenant.
	pub async fn acquire_with_workload_identity(
		&self,
		client_id: &ClientId,
		tenant_id: &TenantId,
		registry_host: &str,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		const OPERATION: Operation = Operation::AcquireWithWorkloadIdentity;

		obs::observe(OPERATION, "acquire", async {
			let Retriever::WorkloadIdentity(retriever) = &self.retriever else {
				return Err(self.mismatch(RetrieverKind::WorkloadIdentity).into());
			};
			let token = retriever.acquire_token(client_id, tenant_id, cancel).await?;

			self.exchanger.exchange(&token, tenant_id, registry_host, cancel).await
		})
		.await
		.map_err(|e| e.in_operation(OPERATION))
	}

	/// Dispatches `credential` to the matching facade operation.
	pub async fn acquire(
		&self,
		credential: &CredentialSpec,
		registry_host: &str,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		match credential {
			CredentialSpec::ManagedIdentity { selector, tenant_id } =>
				self.acquire_with_managed_identity(
					selector,
					tenant_id.as_ref(),
					registry_host,
					cancel,
				)
				.await,
			CredentialSpec::WorkloadIdentity { tenant_id, client_id } =>
				self.acquire_with_workload_identity(client_id, tenant_id, registry_host, cancel)
					.await,
		}
	}

	fn mismatch(&self, requested: RetrieverKind) -> ConfigError {
		ConfigError::RetrieverMismatch {
			configured: self.retriever.kind().as_str(),
			requested: requested.as_str(),
		}
	}
}
#[cfg(feature = "reqwest")]
impl Authorizer<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates an authorizer over the default reqwest client (no redirects, bounded timeout).
	pub fn new(
		retriever: impl Into<RetrieverConfig>,
		exchange: ExchangeConfig,
		limits: &RateLimitConfig,
	) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			ReqwestHttpClient::new()?,
			Arc::new(ReqwestTransportErrorMapper),
			retriever,
			exchange,
			limits,
		))
	}
}
impl<C, M> Clone for Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { retriever: self.retriever.clone(), exchanger: self.exchanger.clone() }
	}
}
impl<C, M> Debug for Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Authorizer")
			.field("retriever", &self.retriever)
			.field("exchanger", &self.exchanger)
			.finish()
	}
}
