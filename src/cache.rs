//! Thread-safe TTL cache for control-plane tokens, private to one retriever instance.
//!
//! Entries live for a fixed TTL measured from acquisition, independent of the token's own
//! `exp` claim. Lookups evict the stale entry for their key only; [`TokenCache::sweep_expired`]
//! clears every stale entry for long-running processes that see many identities.
//! Concurrent misses for the same key are not deduplicated and the last store wins.

// crates.io
use time::PrimitiveDateTime;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, ResourceId},
	clock::{Clock, SystemClock},
	obs::{self, CacheLookup},
};

type CacheMap = Arc<RwLock<HashMap<CacheKey, CacheEntry>>>;

/// Cache key derived from the active managed-identity selector.
///
/// The selector kind is part of the key, so a client identifier and a resource identifier with
/// identical text never share an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
	/// Lower-cased client identifier.
	ClientId(String),
	/// Lower-cased resource identifier.
	ResourceId(String),
}
impl CacheKey {
	/// Builds a key from a client identifier.
	pub fn client(id: &ClientId) -> Self {
		Self::ClientId(id.to_lowercase())
	}

	/// Builds a key from a resource identifier.
	pub fn resource(id: &ResourceId) -> Self {
		Self::ResourceId(id.to_lowercase())
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::ClientId(id) => write!(f, "client_id:{id}"),
			Self::ResourceId(id) => write!(f, "mi_res_id:{id}"),
		}
	}
}

/// Cached token and the instant it stops being served.
#[derive(Clone, Debug)]
pub struct CacheEntry {
	/// Cached token.
	pub token: AccessToken,
	/// First instant at which the entry is stale.
	pub not_after: OffsetDateTime,
}
impl CacheEntry {
	/// Returns `true` while `instant` is strictly before [`CacheEntry::not_after`].
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.not_after
	}
}

/// TTL cache keyed by [`CacheKey`].
#[derive(Clone)]
pub struct TokenCache {
	entries: CacheMap,
	ttl: Duration,
	clock: Arc<dyn Clock>,
}
impl TokenCache {
	/// Creates a cache using the wall clock.
	pub fn new(ttl: Duration) -> Self {
		Self::with_clock(ttl, Arc::new(SystemClock))
	}

	/// Creates a cache driven by `clock`. Negative TTLs are treated as zero.
	pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
		let ttl = if ttl.is_negative() { Duration::ZERO } else { ttl };

		Self { entries: Default::default(), ttl, clock }
	}

	/// Configured time-to-live.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Returns the live token for `key`, evicting the entry if it has expired.
	pub fn get(&self, key: &CacheKey) -> Option<AccessToken> {
		let now = self.clock.now();
		let lookup = match self.entries.read().get(key) {
			Some(entry) if entry.is_valid_at(now) => Ok(entry.token.clone()),
			Some(_) => Err(CacheLookup::Expired),
			None => Err(CacheLookup::Miss),
		};
		let lookup = match lookup {
			Ok(token) => {
				self.observe(key, CacheLookup::Hit);

				return Some(token);
			},
			Err(lookup) => lookup,
		};

		if matches!(lookup, CacheLookup::Expired) {
			let mut entries = self.entries.write();

			// Another caller may have stored a fresh token since the read guard was released.
			if entries.get(key).is_some_and(|entry| !entry.is_valid_at(now)) {
				entries.remove(key);
			}
		}

		self.observe(key, lookup);

		None
	}

	/// Stores `token` under `key`, valid for the configured TTL from now.
	///
	/// TTLs reaching past the largest representable instant keep the entry until that instant.
	pub fn insert(&self, key: CacheKey, token: AccessToken) {
		let not_after = self
			.clock
			.now()
			.checked_add(self.ttl)
			.unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc());

		self.entries.write().insert(key, CacheEntry { token, not_after });
	}

	/// Removes every expired entry, returning how many were dropped.
	pub fn sweep_expired(&self) -> usize {
		let now = self.clock.now();
		let mut entries = self.entries.write();
		let before = entries.len();

		entries.retain(|_, entry| entry.is_valid_at(now));

		before - entries.len()
	}

	/// Number of entries currently held, including stale ones not yet evicted.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns `true` when the cache holds no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	fn observe(&self, key: &CacheKey, lookup: CacheLookup) {
		obs::trace_cache_lookup(key, lookup);
		obs::record_cache_lookup(lookup);
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache").field("ttl", &self.ttl).field("len", &self.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[derive(Debug)]
	struct StepClock(Mutex<OffsetDateTime>);
	impl StepClock {
		fn advance(&self, delta: Duration) {
			*self.0.lock() += delta;
		}
	}
	impl Clock for StepClock {
		fn now(&self) -> OffsetDateTime {
			*self.0.lock()
		}
	}

	fn cache(ttl: Duration) -> (TokenCache, Arc<StepClock>) {
		let clock = Arc::new(StepClock(Mutex::new(OffsetDateTime::UNIX_EPOCH)));

		(TokenCache::with_clock(ttl, clock.clone()), clock)
	}

	fn client_key(raw: &str) -> CacheKey {
		CacheKey::client(&ClientId::new(raw).expect("Client fixture should be valid."))
	}

	#[test]
	fn entries_expire_exactly_at_not_after() {
		let (cache, clock) = cache(Duration::minutes(5));
		let key = client_key("client-a");

		cache.insert(key.clone(), AccessToken::new("arm"));
		clock.advance(Duration::minutes(5) - Duration::SECOND);

		assert_eq!(cache.get(&key).map(AccessToken::into_inner), Some("arm".into()));

		clock.advance(Duration::SECOND);

		assert!(cache.get(&key).is_none());
		assert!(cache.is_empty(), "Expired entries are evicted on lookup.");
	}

	#[test]
	fn zero_ttl_never_serves() {
		let (cache, _clock) = cache(Duration::ZERO);
		let key = client_key("client-a");

		cache.insert(key.clone(), AccessToken::new("arm"));

		assert!(cache.get(&key).is_none());
	}

	#[test]
	fn keys_are_case_insensitive_but_kind_sensitive() {
		let (cache, _clock) = cache(Duration::minutes(5));
		let resource =
			CacheKey::resource(&ResourceId::new("A").expect("Resource fixture should be valid."));

		cache.insert(client_key("A"), AccessToken::new("by-client"));

		assert_eq!(
			cache.get(&client_key("a")).map(AccessToken::into_inner),
			Some("by-client".into())
		);
		assert!(cache.get(&resource).is_none());
		assert_eq!(client_key("ABC").to_string(), "client_id:abc");
	}

	#[test]
	fn sweep_drops_only_stale_entries() {
		let (cache, clock) = cache(Duration::minutes(1));

		cache.insert(client_key("old"), AccessToken::new("1"));
		clock.advance(Duration::minutes(2));
		cache.insert(client_key("new"), AccessToken::new("2"));

		assert_eq!(cache.sweep_expired(), 1);
		assert_eq!(cache.len(), 1);
		assert!(cache.get(&client_key("new")).is_some());
	}

	#[test]
	fn unbounded_ttl_saturates_instead_of_overflowing() {
		let (cache, clock) = cache(Duration::MAX);
		let key = client_key("client-forever");

		cache.insert(key.clone(), AccessToken::new("arm"));
		clock.advance(Duration::days(365 * 100));

		assert_eq!(cache.get(&key).map(AccessToken::into_inner), Some("arm".into()));
	}

	#[test]
	fn negative_ttl_is_clamped() {
		let (cache, _clock) = cache(Duration::minutes(-1));

		assert_eq!(cache.ttl(), Duration::ZERO);
	}
}
