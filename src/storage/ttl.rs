//! TTL Timing Wheel
//!
//! Tracks when keys expire and hands back batches of due keys for the
//! active expiry sweep.
//!
//! ## Layout
//!
//! ```text
//!  bucket = (expires_at / WINDOW) % BUCKETS
//!
//!  ┌──────┬──────┬──────┬─────┬──────┐
//!  │  0   │  1   │  2   │ ... │ 1439 │   1440 buckets × 60s = one day
//!  └──┬───┴──────┴──┬───┴─────┴──────┘
//!     │             │
//!  {(t, key), ..}  {(t, key), ..}       each bucket sorted by (time, key)
//! ```
//!
//! A side index maps each key to its current expiration so `is_expired`,
//! `remove` and re-`add` never have to search the buckets.
//!
//! TTLs longer than a full revolution land in a bucket that comes around
//! before they are due; the sweep just finds nothing due there yet.
//!
//! All times are milliseconds since the Unix epoch so they survive a
//! snapshot round-trip.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of buckets in the wheel.
pub const BUCKET_COUNT: usize = 1440;

/// Time span covered by one bucket.
pub const BUCKET_WINDOW_MS: u64 = 60_000;

/// Maximum keys removed by a single `expire_batch` call.
pub const EXPIRE_BATCH_LIMIT: usize = 100;

/// Milliseconds since the Unix epoch.
#[inline]
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bucketed expiration index for one stash.
#[derive(Debug)]
pub struct TtlWheel {
    buckets: Vec<BTreeSet<(u64, Bytes)>>,
    expirations: HashMap<Bytes, u64>,
    cursor: usize,
    batch_limit: usize,
}

impl Default for TtlWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlWheel {
    /// Creates an empty wheel with the default batch limit.
    pub fn new() -> Self {
        Self::with_batch_limit(EXPIRE_BATCH_LIMIT)
    }

    /// Creates an empty wheel that expires at most `batch_limit` keys per sweep.
    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| BTreeSet::new()).collect(),
            expirations: HashMap::new(),
            cursor: bucket_index(epoch_millis()),
            batch_limit: batch_limit.max(1),
        }
    }

    /// Schedules `key` to expire `ttl_ms` from now, replacing any earlier TTL.
    pub fn add(&mut self, key: Bytes, ttl_ms: u64) {
        self.add_at(key, ttl_ms, epoch_millis());
    }

    /// Like [`add`](Self::add) with an explicit clock.
    pub fn add_at(&mut self, key: Bytes, ttl_ms: u64, now: u64) {
        self.insert_expiration(key, now.saturating_add(ttl_ms));
    }

    /// Schedules `key` to expire at an absolute epoch time.
    pub fn insert_expiration(&mut self, key: Bytes, expires_at: u64) {
        self.remove(&key);
        self.buckets[bucket_index(expires_at)].insert((expires_at, key.clone()));
        self.expirations.insert(key, expires_at);
    }

    /// Forgets any TTL for `key`. Returns true if one existed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.expirations.remove(key) {
            Some(expires_at) => {
                let bucket = &mut self.buckets[bucket_index(expires_at)];
                bucket.remove(&(expires_at, Bytes::copy_from_slice(key)));
                true
            }
            None => false,
        }
    }

    /// Returns true if `key` has a TTL that has passed.
    ///
    /// Pure lookup; the caller decides whether to remove the key.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        self.is_expired_at(key, epoch_millis())
    }

    /// Like [`is_expired`](Self::is_expired) with an explicit clock.
    pub fn is_expired_at(&self, key: &[u8], now: u64) -> bool {
        self.expirations
            .get(key)
            .map(|&expires_at| expires_at <= now)
            .unwrap_or(false)
    }

    /// The absolute expiration of `key`, or None if it never expires.
    pub fn expiration_time(&self, key: &[u8]) -> Option<u64> {
        self.expirations.get(key).copied()
    }

    /// Removes and returns up to one batch of keys that are due.
    pub fn expire_batch(&mut self) -> Vec<Bytes> {
        self.expire_batch_at(epoch_millis())
    }

    /// Like [`expire_batch`](Self::expire_batch) with an explicit clock.
    ///
    /// Walks buckets from the persistent cursor. A bucket is left once it
    /// has nothing due; the walk ends after one full revolution or when the
    /// batch is full, in which case the cursor stays put so the next call
    /// resumes in the same bucket.
    pub fn expire_batch_at(&mut self, now: u64) -> Vec<Bytes> {
        let mut expired = Vec::new();
        if self.expirations.is_empty() {
            return expired;
        }

        for _ in 0..BUCKET_COUNT {
            let bucket = &mut self.buckets[self.cursor];
            while expired.len() < self.batch_limit {
                match bucket.first() {
                    Some((expires_at, _)) if *expires_at <= now => {}
                    _ => break,
                }
                if let Some((_, key)) = bucket.pop_first() {
                    self.expirations.remove(&key);
                    expired.push(key);
                }
            }
            if expired.len() >= self.batch_limit {
                break;
            }
            self.cursor = (self.cursor + 1) % BUCKET_COUNT;
        }

        expired
    }

    /// Number of keys with a TTL.
    pub fn len(&self) -> usize {
        self.expirations.len()
    }

    /// Returns true if no key has a TTL.
    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty()
    }

    /// Drops every TTL.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.expirations.clear();
    }
}

#[inline]
fn bucket_index(expires_at: u64) -> usize {
    ((expires_at / BUCKET_WINDOW_MS) % BUCKET_COUNT as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_not_expired_before_deadline() {
        let mut wheel = TtlWheel::new();
        wheel.add_at(key("k"), 60_000, NOW);

        assert!(!wheel.is_expired_at(b"k", NOW));
        assert!(!wheel.is_expired_at(b"k", NOW + 59_999));
        assert!(wheel.is_expired_at(b"k", NOW + 60_000));
        assert_eq!(wheel.expiration_time(b"k"), Some(NOW + 60_000));
    }

    #[test]
    fn test_real_clock_not_expired_immediately() {
        let mut wheel = TtlWheel::new();
        wheel.add(key("k"), 60_000);
        assert!(!wheel.is_expired(b"k"));
    }

    #[test]
    fn test_add_twice_keeps_one_entry() {
        let mut wheel = TtlWheel::new();
        wheel.add_at(key("k"), 1_000, NOW);
        wheel.add_at(key("k"), 5_000_000, NOW);

        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.expiration_time(b"k"), Some(NOW + 5_000_000));
        let total: usize = wheel.buckets.iter().map(|b| b.len()).sum();
        assert_eq!(total, 1);

        // the first deadline no longer applies
        assert!(wheel.expire_batch_at(NOW + 2_000).is_empty());
    }

    #[test]
    fn test_missing_key_never_expires() {
        let wheel = TtlWheel::new();
        assert!(!wheel.is_expired_at(b"nope", u64::MAX));
        assert_eq!(wheel.expiration_time(b"nope"), None);
    }

    #[test]
    fn test_remove() {
        let mut wheel = TtlWheel::new();
        wheel.add_at(key("k"), 10, NOW);
        assert!(wheel.remove(b"k"));
        assert!(!wheel.remove(b"k"));
        assert!(wheel.is_empty());
        assert!(wheel.expire_batch_at(NOW + 1_000).is_empty());
    }

    #[test]
    fn test_expire_batch_returns_only_due_keys() {
        let mut wheel = TtlWheel::new();
        wheel.add_at(key("soon"), 10, NOW);
        wheel.add_at(key("later"), 3_600_000, NOW);

        let expired = wheel.expire_batch_at(NOW + 100);
        assert_eq!(expired, vec![key("soon")]);
        assert_eq!(wheel.len(), 1);
        assert!(wheel.expiration_time(b"later").is_some());
    }

    #[test]
    fn test_expire_batch_across_buckets() {
        let mut wheel = TtlWheel::new();
        // spread over ten different buckets
        for i in 0..10u64 {
            wheel.add_at(key(&format!("k{i}")), i * BUCKET_WINDOW_MS + 1, NOW);
        }
        let expired = wheel.expire_batch_at(NOW + 11 * BUCKET_WINDOW_MS);
        assert_eq!(expired.len(), 10);
        assert!(wheel.is_empty());
    }

    #[test]
    fn test_expire_batch_respects_limit() {
        let mut wheel = TtlWheel::with_batch_limit(3);
        for i in 0..7 {
            wheel.add_at(key(&format!("k{i}")), 1, NOW);
        }

        assert_eq!(wheel.expire_batch_at(NOW + 10).len(), 3);
        assert_eq!(wheel.expire_batch_at(NOW + 10).len(), 3);
        assert_eq!(wheel.expire_batch_at(NOW + 10).len(), 1);
        assert!(wheel.expire_batch_at(NOW + 10).is_empty());
    }

    #[test]
    fn test_expire_batch_orders_by_time() {
        let mut wheel = TtlWheel::with_batch_limit(2);
        wheel.add_at(key("c"), 30, NOW);
        wheel.add_at(key("a"), 10, NOW);
        wheel.add_at(key("b"), 20, NOW);

        let first = wheel.expire_batch_at(NOW + 1_000);
        assert_eq!(first, vec![key("a"), key("b")]);
    }

    #[test]
    fn test_expire_batch_terminates_when_nothing_due() {
        let mut wheel = TtlWheel::new();
        wheel.add_at(key("k"), 10 * BUCKET_WINDOW_MS, NOW);
        let cursor = wheel.cursor;
        assert!(wheel.expire_batch_at(NOW).is_empty());
        // one full revolution brings the cursor back where it started
        assert_eq!(wheel.cursor, cursor);
    }

    #[test]
    fn test_ttl_longer_than_revolution() {
        let mut wheel = TtlWheel::new();
        let two_days = 2 * BUCKET_COUNT as u64 * BUCKET_WINDOW_MS;
        wheel.add_at(key("k"), two_days, NOW);

        assert!(wheel.expire_batch_at(NOW + two_days / 2).is_empty());
        assert_eq!(wheel.expire_batch_at(NOW + two_days), vec![key("k")]);
    }

    #[test]
    fn test_clear() {
        let mut wheel = TtlWheel::new();
        wheel.add_at(key("a"), 10, NOW);
        wheel.add_at(key("b"), 10, NOW);
        wheel.clear();
        assert!(wheel.is_empty());
        assert!(wheel.expire_batch_at(NOW + 100).is_empty());
    }
}
