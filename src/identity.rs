//! Control-plane token retrievers and the credential selectors that drive them.
//!
//! Two mutually exclusive flows produce the same class of token:
//! [`ManagedIdentityRetriever`] asks the node-local metadata endpoint and caches the result,
//! while [`WorkloadIdentityRetriever`] trades a mounted federated assertion at the identity
//! provider on every call.

pub mod managed;
pub mod workload;

pub use managed::*;
pub use workload::*;

// self
use crate::{
	_prelude::*,
	auth::{ClientId, ResourceId, TenantId},
	cache::CacheKey,
	error::ConfigError,
};

/// Identity the managed-identity retriever asks the metadata endpoint for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ManagedIdentitySelector {
	/// User-assigned identity addressed by client identifier.
	ClientId(ClientId),
	/// User-assigned identity addressed by resource identifier.
	ResourceId(ResourceId),
}
impl ManagedIdentitySelector {
	/// Builds a selector from optional raw inputs, treating empty strings as absent.
	///
	/// Exactly one input must be present. Supplying both is rejected with
	/// [`ConfigError::ConflictingSelectors`]; the client identifier does not take precedence.
	pub fn from_parts(
		client_id: Option<&str>,
		resource_id: Option<&str>,
	) -> Result<Self, ConfigError> {
		let client_id = client_id.filter(|value| !value.is_empty());
		let resource_id = resource_id.filter(|value| !value.is_empty());

		match (client_id, resource_id) {
			(Some(client_id), None) => Ok(Self::ClientId(ClientId::new(client_id)?)),
			(None, Some(resource_id)) => Ok(Self::ResourceId(ResourceId::new(resource_id)?)),
			(None, None) => Err(ConfigError::MissingSelector),
			(Some(_), Some(_)) => Err(ConfigError::ConflictingSelectors),
		}
	}

	/// Query parameter naming the identity in a metadata request.
	pub fn query_param(&self) -> &'static str {
		match self {
			Self::ClientId(_) => "client_id",
			Self::ResourceId(_) => "mi_res_id",
		}
	}

	/// Raw identifier text.
	pub fn value(&self) -> &str {
		match self {
			Self::ClientId(id) => id.as_ref(),
			Self::ResourceId(id) => id.as_ref(),
		}
	}

	/// Cache key for tokens acquired with this selector.
	pub fn cache_key(&self) -> CacheKey {
		match self {
			Self::ClientId(id) => CacheKey::client(id),
			Self::ResourceId(id) => CacheKey::resource(id),
		}
	}
}
impl From<ClientId> for ManagedIdentitySelector {
	fn from(value: ClientId) -> Self {
		Self::ClientId(value)
	}
}
impl From<ResourceId> for ManagedIdentitySelector {
	fn from(value: ResourceId) -> Self {
		Self::ResourceId(value)
	}
}

/// Credential a caller wants turned into a registry token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSpec {
	/// Node-local managed identity.
	ManagedIdentity {
		/// Identity to request from the metadata endpoint.
		selector: ManagedIdentitySelector,
		/// Tenant sent to the registry; read from the token's claims when absent.
		tenant_id: Option<TenantId>,
	},
	/// Federated workload identity; the assertion comes from the mounted file.
	WorkloadIdentity {
		/// Tenant of the federated application.
		tenant_id: TenantId,
		/// Client identifier of the federated application.
		client_id: ClientId,
	},
}
impl CredentialSpec {
	/// Retriever flow that serves this credential.
	pub fn kind(&self) -> RetrieverKind {
		match self {
			Self::ManagedIdentity { .. } => RetrieverKind::ManagedIdentity,
			Self::WorkloadIdentity { .. } => RetrieverKind::WorkloadIdentity,
		}
	}
}

/// Retriever flows an authorizer can be built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetrieverKind {
	/// [`ManagedIdentityRetriever`].
	ManagedIdentity,
	/// [`WorkloadIdentityRetriever`].
	WorkloadIdentity,
}
impl RetrieverKind {
	/// Returns a stable label suitable for errors and logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ManagedIdentity => "managed identity",
			Self::WorkloadIdentity => "workload identity",
		}
	}
}
impl Display for RetrieverKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn selector_requires_exactly_one_input() {
		assert!(matches!(
			ManagedIdentitySelector::from_parts(None, Some("")),
			Err(ConfigError::MissingSelector)
		));
		assert!(matches!(
			ManagedIdentitySelector::from_parts(Some("c"), Some("r")),
			Err(ConfigError::ConflictingSelectors)
		));
		assert!(matches!(
			ManagedIdentitySelector::from_parts(Some("bad id"), None),
			Err(ConfigError::InvalidIdentifier(_))
		));

		let selector = ManagedIdentitySelector::from_parts(Some(""), Some("/subscriptions/s/id"))
			.expect("A lone resource identifier should be accepted.");

		assert_eq!(selector.query_param(), "mi_res_id");
		assert_eq!(selector.value(), "/subscriptions/s/id");
	}

	#[test]
	fn selector_kinds_produce_distinct_cache_keys() {
		let by_client = ManagedIdentitySelector::from_parts(Some("A"), None)
			.expect("Client selector should build.");
		let by_resource = ManagedIdentitySelector::from_parts(None, Some("A"))
			.expect("Resource selector should build.");

		assert_ne!(by_client.cache_key(), by_resource.cache_key());
		assert_eq!(by_client.query_param(), "client_id");
	}

	#[test]
	fn credential_spec_reports_its_flow() {
		let credential = CredentialSpec::WorkloadIdentity {
			tenant_id: TenantId::new("t").expect("Tenant fixture should be valid."),
			client_id: ClientId::new("c").expect("Client fixture should be valid."),
		};

		assert_eq!(credential.kind(), RetrieverKind::WorkloadIdentity);
		assert_eq!(credential.kind().to_string(), "workload identity");
	}
}
