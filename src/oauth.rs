//! OAuth client plumbing: transport error mapping and the federated assertion exchange.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, ClientId as OAuthClientId, HttpClientError, RequestTokenError, Scope,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId},
	error::{ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	obs::Operation,
	transport::RateLimitedTransport,
};

/// `client_assertion_type` for JWT bearer client assertions (RFC 7523).
pub const JWT_BEARER_ASSERTION_TYPE: &str =
	"urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Maps HTTP transport failures into broker [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a broker error.
	fn map_transport_error(
		&self,
		operation: Operation,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		operation: Operation,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(operation, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) =>
				map_generic_transport_error(operation, meta, message),
			_ => map_unknown_transport_error(operation, meta),
		}
	}
}

/// Inputs for one client-assertion exchange.
pub(crate) struct AssertionGrant<'a> {
	pub(crate) token_endpoint: Url,
	pub(crate) client_id: &'a ClientId,
	pub(crate) assertion: String,
	pub(crate) scope: String,
}

/// Performs a `client_credentials` grant authenticated by a federated client assertion.
pub(crate) async fn exchange_client_assertion<C, M>(
	transport: &RateLimitedTransport<C>,
	mapper: &M,
	grant: AssertionGrant<'_>,
	cancel: &CancellationToken,
) -> Result<AccessToken>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let client = BasicClient::new(OAuthClientId::new(grant.client_id.to_string()))
		.set_token_uri(TokenUrl::from_url(grant.token_endpoint))
		.set_auth_type(AuthType::RequestBody);
	let slot = ResponseMetadataSlot::default();
	let handle = transport.client().with_metadata(slot.clone());
	let request = client
		.exchange_client_credentials()
		.add_scope(Scope::new(grant.scope))
		.add_extra_param("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
		.add_extra_param("client_assertion", grant.assertion);
	let response = transport
		.throttle(cancel, async {
			request
				.request_async(&handle)
				.await
				.map_err(|err| map_request_error(slot.take(), err, mapper))
		})
		.await?;

	Ok(AccessToken::new(response.access_token().secret().to_owned()))
}

fn map_request_error<E, M>(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	const OPERATION: Operation = Operation::WorkloadIdentity;

	let meta_ref = meta.as_ref();
	let status = meta_status(meta_ref);
	let rejected = status.is_some_and(|code| (400..500).contains(&code));

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(response, status),
		RequestTokenError::Request(error) =>
			mapper.map_transport_error(OPERATION, meta_ref, error),
		RequestTokenError::Parse(_, body) if rejected => Error::Auth {
			reason: String::from_utf8_lossy(&body).into_owned(),
			status,
		},
		RequestTokenError::Parse(source, _body) =>
			TransientError::ResponseParse { operation: OPERATION, source, status }.into(),
		RequestTokenError::Other(message) if rejected =>
			Error::Auth { reason: message, status },
		RequestTokenError::Other(message) => TransientError::Endpoint {
			operation: OPERATION,
			message,
			status,
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(response: BasicErrorResponse, status: Option<u16>) -> Error {
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	Error::Auth { reason, status }
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	operation: Operation,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::Endpoint {
			operation,
			message: "request timed out".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

#[cfg(feature = "reqwest")]
fn map_generic_transport_error(
	operation: Operation,
	meta: Option<&ResponseMetadata>,
	message: impl Display,
) -> Error {
	TransientError::Endpoint {
		operation,
		message: format!("HTTP client error: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

#[cfg(feature = "reqwest")]
fn map_unknown_transport_error(operation: Operation, meta: Option<&ResponseMetadata>) -> Error {
	TransientError::Endpoint {
		operation,
		message: "HTTP client error".into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
