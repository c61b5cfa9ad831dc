//! Registry token exchanger: trades a control-plane token for a registry refresh token.
//!
//! The registry endpoint is `POST {scheme}://{host}/oauth2/exchange` with a form body carrying
//! `grant_type=access_token`, the registry's hostname as `service`, the tenant when one is
//! known, and the control-plane token. Any status other than `200` is surfaced with its body
//! intact.

// crates.io
use oauth2::{
	HttpRequest,
	http::{
		Method, StatusCode,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use url::form_urlencoded::Serializer;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TenantId},
	config::ExchangeConfig,
	error::{ConfigError, TransientError},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, Operation},
	transport::{self, RateLimitedTransport},
};

const EXCHANGE_PATH: &str = "/oauth2/exchange";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Deserialize)]
struct ExchangeResponse {
	refresh_token: String,
}

/// Calls a registry's token exchange endpoint through the shared transport.
pub struct RegistryExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	transport: RateLimitedTransport<C>,
	mapper: Arc<M>,
	config: ExchangeConfig,
}
impl<C, M> RegistryExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds an exchanger over `transport`.
	pub fn new(
		transport: RateLimitedTransport<C>,
		mapper: impl Into<Arc<M>>,
		config: ExchangeConfig,
	) -> Self {
		Self { transport, mapper: mapper.into(), config }
	}

	/// Active configuration.
	pub fn config(&self) -> &ExchangeConfig {
		&self.config
	}

	/// Exchanges `token` for a refresh token scoped to `registry_host` on behalf of `tenant`.
	///
	/// `registry_host` is a bare authority such as `myregistry.azurecr.io` or
	/// `localhost:5000`.
	pub async fn exchange(
		&self,
		token: &AccessToken,
		tenant: &TenantId,
		registry_host: &str,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		self.exchange_for(token, Some(tenant), registry_host, cancel).await
	}

	/// Exchanges `token` using the tenant named in its own claims.
	#[deprecated(note = "Pass the tenant explicitly with `RegistryExchanger::exchange`.")]
	pub async fn exchange_with_token_tenant(
		&self,
		token: &AccessToken,
		registry_host: &str,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		let tenant = token.tenant_id()?;

		self.exchange(token, &tenant, registry_host, cancel).await
	}

	/// Exchanges `token`, omitting the `tenant` field when `tenant` is `None`.
	pub(crate) async fn exchange_for(
		&self,
		token: &AccessToken,
		tenant: Option<&TenantId>,
		registry_host: &str,
		cancel: &CancellationToken,
	) -> Result<AccessToken> {
		obs::observe(Operation::RegistryExchange, "exchange", async {
			let request = self.request(token, tenant, registry_host)?;

			self.send(request, cancel).await
		})
		.await
	}

	fn request(
		&self,
		token: &AccessToken,
		tenant: Option<&TenantId>,
		registry_host: &str,
	) -> Result<HttpRequest, ConfigError> {
		let url = exchange_url(&self.config.scheme, registry_host)?;
		let service = url
			.host_str()
			.ok_or_else(|| ConfigError::InvalidRegistryHost { host: registry_host.into() })?;
		let body = exchange_form(service, tenant, token);
		let request = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(url.as_str())
			.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
			.header(ACCEPT, "application/json")
			.body(body.into_bytes())?;

		Ok(request)
	}

	async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<AccessToken> {
		const OPERATION: Operation = Operation::RegistryExchange;

		let (response, meta) =
			self.transport.send(OPERATION, request, self.mapper.as_ref(), cancel).await?;

		if response.status() != StatusCode::OK {
			return Err(Error::Exchange {
				status: response.status().as_u16(),
				body: transport::body_text(&response),
				retry_after: meta.retry_after,
			});
		}

		let parsed = transport::parse_json::<ExchangeResponse>(OPERATION, &response)?;

		if parsed.refresh_token.is_empty() {
			return Err(TransientError::Endpoint {
				operation: OPERATION,
				message: "response carried an empty refresh_token".into(),
				status: meta.status,
				retry_after: meta.retry_after,
			}
			.into());
		}

		Ok(AccessToken::new(parsed.refresh_token))
	}
}
impl<C, M> Clone for RegistryExchanger<C, M>
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
impl<C, M> Debug for RegistryExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RegistryExchanger").field("config", &self.config).finish_non_exhaustive()
	}
}

fn exchange_url(scheme: &str, registry_host: &str) -> Result<Url, ConfigError> {
	let host = registry_host.trim().trim_end_matches('/');

	if host.is_empty() || host.contains(['/', '?', '#', '@']) {
		return Err(ConfigError::InvalidRegistryHost { host: registry_host.into() });
	}

	let endpoint = format!("{scheme}://{host}{EXCHANGE_PATH}");

	Url::parse(&endpoint).map_err(|e| ConfigError::invalid_endpoint(endpoint, e))
}

fn exchange_form(service: &str, tenant: Option<&TenantId>, token: &AccessToken) -> String {
	let mut form = Serializer::new(String::new());

	form.append_pair("grant_type", "access_token").append_pair("service", service);

	if let Some(tenant) = tenant {
		form.append_pair("tenant", tenant);
	}

	form.append_pair("access_token", token.expose()).finish()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn exchange_url_joins_scheme_host_and_path() {
		let url = exchange_url("https", "myregistry.azurecr.io").expect("Host should be accepted.");

		assert_eq!(url.as_str(), "https://myregistry.azurecr.io/oauth2/exchange");

		let url = exchange_url("http", "localhost:5000").expect("Host with port should be accepted.");

		assert_eq!(url.host_str(), Some("localhost"));
		assert_eq!(url.port(), Some(5000));
	}

	#[test]
	fn exchange_form_omits_unknown_tenant() {
		let token = AccessToken::new("armTok");
		let tenant = TenantId::new("T").expect("Tenant fixture should be valid.");

		assert_eq!(
			exchange_form("h", Some(&tenant), &token),
			"grant_type=access_token&service=h&tenant=T&access_token=armTok"
		);
		assert_eq!(
			exchange_form("h", None, &token),
			"grant_type=access_token&service=h&access_token=armTok"
		);
	}

	#[test]
	fn exchange_url_rejects_paths_and_blank_hosts() {
		assert!(matches!(
			exchange_url("https", ""),
			Err(ConfigError::InvalidRegistryHost { .. })
		));
		assert!(matches!(
			exchange_url("https", "registry.example/v2"),
			Err(ConfigError::InvalidRegistryHost { .. })
		));
		assert!(matches!(
			exchange_url("https", "bad host"),
			Err(ConfigError::InvalidEndpoint { .. })
		));
	}
}
