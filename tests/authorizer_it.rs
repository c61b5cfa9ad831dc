// std
use std::path::PathBuf;
// crates.io
use httpmock::prelude::*;
// self
use registry_token_broker::{
	_preludet::*,
	auth::{ClientId, TenantId},
	authorizer::{Authorizer, ReqwestAuthorizer},
	config::{ExchangeConfig, ManagedIdentityConfig, WorkloadIdentityConfig},
	error::ConfigError,
	identity::{CredentialSpec, ManagedIdentitySelector},
	obs::Operation,
};

const METADATA_PATH: &str = "/metadata/identity/oauth2/token";
const EXCHANGE_PATH: &str = "/oauth2/exchange";

fn managed_authorizer(server: &MockServer) -> ReqwestAuthorizer {
	Authorizer::with_transport(
		test_transport(),
		test_mapper(),
		ManagedIdentityConfig::default().with_endpoint(server.url(METADATA_PATH)),
		ExchangeConfig::default().with_scheme("http"),
	)
}

fn workload_authorizer(server: &MockServer, assertion_file: PathBuf) -> ReqwestAuthorizer {
	Authorizer::with_transport(
		test_transport(),
		test_mapper(),
		WorkloadIdentityConfig::default()
			.with_authority(server.url("/"))
			.with_assertion_file(assertion_file),
		ExchangeConfig::default().with_scheme("http"),
	)
}

fn selector() -> ManagedIdentitySelector {
	ManagedIdentitySelector::from_parts(Some("client-e2e"), None)
		.expect("Client selector should build.")
}

fn metadata_body(claims: serde_json::Value) -> String {
	serde_json::json!({ "access_token": unsigned_jwt(claims), "token_type": "Bearer" }).to_string()
}

#[tokio::test]
async fn managed_identity_end_to_end_reuses_cached_control_plane_token() {
	let server = MockServer::start_async().await;
	let arm_token = unsigned_jwt(serde_json::json!({ "tid": "tenant-mi", "exp": 1_900_000_000 }));
	let metadata = server
		.mock_async(|when, then| {
			when.method(GET).path(METADATA_PATH).query_param("client_id", "client-e2e");
			then.status(200)
				.header("content-type", "application/json")
				.body(serde_json::json!({ "access_token": arm_token }).to_string());
		})
		.await;
	let exchange = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(EXCHANGE_PATH)
				.form_urlencoded_tuple("tenant", "tenant-mi")
				.form_urlencoded_tuple("service", "127.0.0.1")
				.form_urlencoded_tuple("access_token", &arm_token);
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"refresh_token\":\"acr-refresh\"}");
		})
		.await;
	let authorizer = managed_authorizer(&server);
	let host = server.address().to_string();
	let cancel = CancellationToken::new();
	let first = authorizer
		.acquire_with_managed_identity(&selector(), None, &host, &cancel)
		.await
		.expect("End-to-end acquisition should succeed.");

	assert_eq!(first.expose(), "acr-refresh");

	metadata.assert_calls_async(1).await;
	exchange.assert_calls_async(1).await;

	authorizer
		.acquire_with_managed_identity(&selector(), None, &host, &cancel)
		.await
		.expect("Second acquisition should succeed.");

	metadata.assert_calls_async(1).await;
	exchange.assert_calls_async(2).await;
}

#[tokio::test]
async fn managed_identity_falls_back_to_tenant_claim() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path(METADATA_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(metadata_body(serde_json::json!({ "tenant": "fallback-tenant" })));
		})
		.await;

	let exchange = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH).form_urlencoded_tuple("tenant", "fallback-tenant");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"refresh_token\":\"acr-refresh\"}");
		})
		.await;

	managed_authorizer(&server)
		.acquire_with_managed_identity(
			&selector(),
			None,
			&server.address().to_string(),
			&CancellationToken::new(),
		)
		.await
		.expect("Acquisition should use the `tenant` claim.");

	exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn retrieval_failure_short_circuits_exchange() {
	let server = MockServer::start_async().await;
	let metadata = server
		.mock_async(|when, then| {
			when.method(GET).path(METADATA_PATH);
			then.status(500).body("metadata unavailable");
		})
		.await;
	let exchange = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(200).body("{\"refresh_token\":\"unused\"}");
		})
		.await;
	let err = managed_authorizer(&server)
		.acquire_with_managed_identity(
			&selector(),
			None,
			&server.address().to_string(),
			&CancellationToken::new(),
		)
		.await
		.expect_err("A failing metadata endpoint must fail the facade.");

	assert!(matches!(
		err,
		Error::Operation { operation: Operation::AcquireWithManagedIdentity, .. }
	));
	assert!(matches!(err.root_cause(), Error::Metadata { status: 500, .. }));
	assert!(err.to_string().contains("metadata unavailable"));
	assert!(!err.is_permanent());

	metadata.assert_calls_async(1).await;
	exchange.assert_calls_async(0).await;
}

#[tokio::test]
async fn opaque_control_plane_tokens_are_exchanged_without_tenant() {
	let server = MockServer::start_async().await;
	let metadata = server
		.mock_async(|when, then| {
			when.method(GET).path(METADATA_PATH).query_param("client_id", "C");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"armTok\"}");
		})
		.await;
	let exchange = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(EXCHANGE_PATH)
				.form_urlencoded_tuple("access_token", "armTok")
				.form_urlencoded_tuple("service", "127.0.0.1")
				.body_excludes("tenant=");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"refresh_token\":\"acrTok\"}");
		})
		.await;
	let selector = ManagedIdentitySelector::from_parts(Some("C"), Some(""))
		.expect("Client selector should build.");
	let refresh = managed_authorizer(&server)
		.acquire_with_managed_identity(
			&selector,
			None,
			&server.address().to_string(),
			&CancellationToken::new(),
		)
		.await
		.expect("Opaque control-plane tokens should still be exchanged.");

	assert_eq!(refresh.expose(), "acrTok");

	metadata.assert_calls_async(1).await;
	exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn explicit_tenant_overrides_token_claims() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path(METADATA_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(metadata_body(serde_json::json!({ "tid": "claims-tenant" })));
		})
		.await;

	let exchange = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH).form_urlencoded_tuple("tenant", "explicit-tenant");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"refresh_token\":\"acr-refresh\"}");
		})
		.await;
	let credential = CredentialSpec::ManagedIdentity {
		selector: selector(),
		tenant_id: Some(TenantId::new("explicit-tenant").expect("Tenant fixture should be valid.")),
	};

	managed_authorizer(&server)
		.acquire(&credential, &server.address().to_string(), &CancellationToken::new())
		.await
		.expect("Acquisition with an explicit tenant should succeed.");

	exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn workload_identity_end_to_end_uses_caller_tenant() {
	let server = MockServer::start_async().await;
	let assertion_file = std::env::temp_dir()
		.join(format!("registry-token-broker-{}-authorizer.jwt", std::process::id()));

	tokio::fs::write(&assertion_file, "federated-assertion")
		.await
		.expect("Assertion fixture should be writable.");

	let federation = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/tenant-wi/oauth2/v2.0/token")
				.form_urlencoded_tuple("client_id", "client-wi");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"arm-wi\",\"token_type\":\"Bearer\",\"expires_in\":3599}",
			);
		})
		.await;
	let exchange = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(EXCHANGE_PATH)
				.form_urlencoded_tuple("tenant", "tenant-wi")
				.form_urlencoded_tuple("access_token", "arm-wi");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"refresh_token\":\"acr-wi\"}");
		})
		.await;
	let authorizer = workload_authorizer(&server, assertion_file);
	let credential = CredentialSpec::WorkloadIdentity {
		tenant_id: TenantId::new("tenant-wi").expect("Tenant fixture should be valid."),
		client_id: ClientId::new("client-wi").expect("Client fixture should be valid."),
	};
	let refresh = authorizer
		.acquire(&credential, &server.address().to_string(), &CancellationToken::new())
		.await
		.expect("Workload identity acquisition should succeed.");

	assert_eq!(refresh.expose(), "acr-wi");

	federation.assert_calls_async(1).await;
	exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn authorizer_refuses_the_flow_it_was_not_built_for() {
	let server = MockServer::start_async().await;
	let authorizer = managed_authorizer(&server);
	let err = authorizer
		.acquire_with_workload_identity(
			&ClientId::new("client-wi").expect("Client fixture should be valid."),
			&TenantId::new("tenant-wi").expect("Tenant fixture should be valid."),
			&server.address().to_string(),
			&CancellationToken::new(),
		)
		.await
		.expect_err("A managed-identity authorizer cannot serve workload identity.");

	assert!(matches!(
		err.root_cause(),
		Error::Config(ConfigError::RetrieverMismatch {
			configured: "managed identity",
			requested: "workload identity",
		})
	));
	assert!(err.is_permanent());
}

#[tokio::test]
async fn cancelled_callers_fail_without_calling_upstream() {
	let server = MockServer::start_async().await;
	let metadata = server
		.mock_async(|when, then| {
			when.method(GET).path(METADATA_PATH);
			then.status(200).body("{}");
		})
		.await;
	let cancel = CancellationToken::new();

	cancel.cancel();

	let err = managed_authorizer(&server)
		.acquire_with_managed_identity(&selector(), None, &server.address().to_string(), &cancel)
		.await
		.expect_err("Cancelled callers must fail.");

	assert!(matches!(err.root_cause(), Error::RateLimitCancelled));

	metadata.assert_calls_async(0).await;
}
