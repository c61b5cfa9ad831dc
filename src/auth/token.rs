//! Opaque bearer token wrapper that redacts sensitive material.

// self
use crate::{
	_prelude::*,
	auth::{ClaimError, Claims, TenantId},
};

/// Signed bearer token issued by an identity endpoint or a registry.
///
/// The value is opaque to the broker. Claims are decoded on demand and without signature
/// verification; trust comes from the TLS channel to the issuer, not from local checks.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);
impl AccessToken {
	/// Wraps a new token string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Consumes the wrapper, returning the raw token.
	pub fn into_inner(self) -> String {
		self.0
	}

	/// Decodes the payload claims without verifying the signature.
	pub fn claims(&self) -> Result<Claims, ClaimError> {
		Claims::decode(&self.0)
	}

	/// Tenant that issued the token (`tid`, falling back to `tenant`).
	pub fn tenant_id(&self) -> Result<TenantId, ClaimError> {
		self.claims()?.tenant_id()
	}

	/// Expiry instant carried in the `exp` claim.
	pub fn expiry(&self) -> Result<OffsetDateTime, ClaimError> {
		self.claims()?.expiry()
	}
}
impl AsRef<str> for AccessToken {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("AccessToken").field(&"<redacted>").finish()
	}
}
impl Display for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn token_formatters_redact() {
		let token = AccessToken::new("eyJhbGciOi.super.secret");

		assert_eq!(format!("{token:?}"), "AccessToken(\"<redacted>\")");
		assert_eq!(format!("{token}"), "<redacted>");
		assert_eq!(token.expose(), "eyJhbGciOi.super.secret");
	}

	#[test]
	fn serializes_as_plain_string() {
		let token = AccessToken::new("abc");

		assert_eq!(serde_json::to_string(&token).expect("Token should serialize."), "\"abc\"");
	}
}
