//! Unverified JWT claim decoding.
//!
//! Tokens handled here arrive over TLS from the issuing endpoint, so the broker reads their
//! payload without checking signatures. Only the tenant and expiry claims are interpreted.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, auth::TenantId};

const TENANT_CLAIMS: [&str; 2] = ["tid", "tenant"];
const EXPIRY_CLAIM: &str = "exp";

/// Errors raised while extracting claims from a token.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ClaimError {
	/// The claim is absent from the payload.
	#[error("Token is missing the `{claim}` claim.")]
	Missing {
		/// Claim name.
		claim: &'static str,
	},
	/// The payload or claim has an unexpected shape.
	#[error("Token claim `{claim}` is malformed: {reason}.")]
	Malformed {
		/// Claim name, or `payload` when the token itself cannot be decoded.
		claim: &'static str,
		/// Human-readable description of the problem.
		reason: String,
	},
}
impl ClaimError {
	fn malformed(claim: &'static str, reason: impl Into<String>) -> Self {
		Self::Malformed { claim, reason: reason.into() }
	}
}

/// Decoded JWT payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Claims(Map<String, Value>);
impl Claims {
	/// Decodes the payload segment of a compact JWT.
	pub fn decode(token: &str) -> Result<Self, ClaimError> {
		let mut segments = token.split('.');
		let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
			(Some(_), Some(payload), Some(_), None) => payload,
			_ => return Err(ClaimError::malformed("payload", "token is not a compact JWT")),
		};
		let bytes = URL_SAFE_NO_PAD
			.decode(payload.trim_end_matches('='))
			.map_err(|e| ClaimError::malformed("payload", e.to_string()))?;
		let map = serde_json::from_slice::<Map<String, Value>>(&bytes)
			.map_err(|e| ClaimError::malformed("payload", e.to_string()))?;

		Ok(Self(map))
	}

	/// Returns the raw claim value, if present.
	pub fn get(&self, claim: &str) -> Option<&Value> {
		self.0.get(claim)
	}

	/// Tenant identifier from `tid`, falling back to `tenant`.
	pub fn tenant_id(&self) -> Result<TenantId, ClaimError> {
		let (claim, value) = TENANT_CLAIMS
			.iter()
			.find_map(|claim| self.get(claim).map(|value| (*claim, value)))
			.ok_or(ClaimError::Missing { claim: TENANT_CLAIMS[0] })?;
		let text = value.as_str().ok_or_else(|| ClaimError::malformed(claim, "expected a string"))?;

		TenantId::new(text).map_err(|e| ClaimError::malformed(claim, e.to_string()))
	}

	/// Expiry instant from `exp`, accepting integer, floating-point, and textual numbers.
	pub fn expiry(&self) -> Result<OffsetDateTime, ClaimError> {
		let value = self.get(EXPIRY_CLAIM).ok_or(ClaimError::Missing { claim: EXPIRY_CLAIM })?;
		let seconds = match value {
			Value::Number(number) => match number.as_i64() {
				Some(whole) => return unix_seconds(whole),
				None => number
					.as_f64()
					.ok_or_else(|| ClaimError::malformed(EXPIRY_CLAIM, "number out of range"))?,
			},
			Value::String(text) => text.trim().parse::<f64>().map_err(|_| {
				ClaimError::malformed(EXPIRY_CLAIM, format!("`{text}` is not numeric"))
			})?,
			other => {
				return Err(ClaimError::malformed(
					EXPIRY_CLAIM,
					format!("unexpected JSON type {}", json_kind(other)),
				));
			},
		};

		if !seconds.is_finite() {
			return Err(ClaimError::malformed(EXPIRY_CLAIM, "timestamp is not finite"));
		}

		unix_seconds(seconds.floor() as i64)
	}
}

fn unix_seconds(seconds: i64) -> Result<OffsetDateTime, ClaimError> {
	OffsetDateTime::from_unix_timestamp(seconds)
		.map_err(|_| ClaimError::malformed(EXPIRY_CLAIM, "timestamp out of range"))
}

fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}
