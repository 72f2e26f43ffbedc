//! In-memory, concurrency-safe storage for ephemeral credentials.
//!
//! Holds live OTP codes, magic-link records, and rate-limit windows. State is
//! intentionally volatile: a restart drops every pending credential, which is
//! acceptable because codes and links are short-lived and re-issuable.
//!
//! The one-shot guarantee lives here: validation always goes through
//! `take_otp`/`take_magic_link`, an atomic read-then-delete, so two concurrent
//! validators can never both observe the same record.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// A live OTP or magic-link record.
///
/// OTP records are keyed by the subject email; magic-link records are keyed
/// by the hash of their token and carry the bound email in `subject`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Email the credential is bound to.
    pub subject: String,
    /// 6-digit code for OTPs; empty for magic links (the token is the key).
    pub secret: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
}

impl CredentialRecord {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Fixed-window issuance counter for one subject.
#[derive(Clone, Copy, Debug)]
struct RateWindow {
    window_start_ms: i64,
    request_count: u32,
}

/// Storage seam for ephemeral credential state.
///
/// Every operation is atomic with respect to concurrent requests for the same
/// key; read-check-mutate sequences are never split across two acquisitions.
pub trait CredentialStore: Send + Sync {
    /// Store an OTP record, replacing any prior live record for the email.
    fn put_otp(&self, email: &str, record: CredentialRecord);

    /// Atomically remove and return the OTP record for the email, if any.
    fn take_otp(&self, email: &str) -> Option<CredentialRecord>;

    /// Store a magic-link record keyed by the token hash, replacing any prior
    /// record under the same hash.
    fn put_magic_link(&self, token_hash: Vec<u8>, record: CredentialRecord);

    /// Atomically remove and return the magic-link record for the token hash.
    fn take_magic_link(&self, token_hash: &[u8]) -> Option<CredentialRecord>;

    /// Bump the fixed-window counter for `key` and return the post-increment
    /// count. A window older than `window_ms` is reset to a count of 1.
    fn increment_rate_window(&self, key: &str, now_ms: i64, window_ms: i64) -> u32;
}

#[derive(Debug, Default)]
struct StoreInner {
    otp: HashMap<String, CredentialRecord>,
    magic: HashMap<Vec<u8>, CredentialRecord>,
    windows: HashMap<String, RateWindow>,
}

/// Default store: a single mutex over three maps.
///
/// One lock keeps every read-modify-write atomic; nothing blocking runs while
/// it is held (mail dispatch happens after the store mutation, outside it).
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the maps are still structurally sound.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn put_otp(&self, email: &str, record: CredentialRecord) {
        self.lock().otp.insert(email.to_string(), record);
    }

    fn take_otp(&self, email: &str) -> Option<CredentialRecord> {
        self.lock().otp.remove(email)
    }

    fn put_magic_link(&self, token_hash: Vec<u8>, record: CredentialRecord) {
        self.lock().magic.insert(token_hash, record);
    }

    fn take_magic_link(&self, token_hash: &[u8]) -> Option<CredentialRecord> {
        self.lock().magic.remove(token_hash)
    }

    fn increment_rate_window(&self, key: &str, now_ms: i64, window_ms: i64) -> u32 {
        let mut inner = self.lock();
        let window = inner
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                window_start_ms: now_ms,
                request_count: 0,
            });

        if now_ms - window.window_start_ms >= window_ms {
            // Stale window: start counting again from this request.
            window.window_start_ms = now_ms;
            window.request_count = 1;
        } else {
            window.request_count = window.request_count.saturating_add(1);
        }

        window.request_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn record(subject: &str, secret: &str, expires_at_ms: i64) -> CredentialRecord {
        CredentialRecord {
            subject: subject.to_string(),
            secret: secret.to_string(),
            issued_at_ms: 0,
            expires_at_ms,
        }
    }

    #[test]
    fn take_otp_removes_record() {
        let store = InMemoryCredentialStore::new();
        store.put_otp("user@example.com", record("user@example.com", "042773", 100));

        let taken = store.take_otp("user@example.com");
        assert_eq!(taken.map(|r| r.secret), Some("042773".to_string()));
        assert_eq!(store.take_otp("user@example.com"), None);
    }

    #[test]
    fn put_otp_replaces_previous_record() {
        let store = InMemoryCredentialStore::new();
        store.put_otp("user@example.com", record("user@example.com", "111111", 100));
        store.put_otp("user@example.com", record("user@example.com", "222222", 200));

        let taken = store.take_otp("user@example.com");
        assert_eq!(taken.map(|r| r.secret), Some("222222".to_string()));
    }

    #[test]
    fn magic_link_keyed_by_token_hash() {
        let store = InMemoryCredentialStore::new();
        store.put_magic_link(vec![1, 2, 3], record("user@example.com", "", 100));

        assert_eq!(store.take_magic_link(&[9, 9, 9]), None);
        let taken = store.take_magic_link(&[1, 2, 3]);
        assert_eq!(taken.map(|r| r.subject), Some("user@example.com".to_string()));
        assert_eq!(store.take_magic_link(&[1, 2, 3]), None);
    }

    #[test]
    fn rate_window_counts_and_resets() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(store.increment_rate_window("otp:user@example.com", 0, 1_000), 1);
        assert_eq!(store.increment_rate_window("otp:user@example.com", 10, 1_000), 2);
        assert_eq!(store.increment_rate_window("otp:user@example.com", 999, 1_000), 3);
        // Window elapsed: counter restarts at 1.
        assert_eq!(
            store.increment_rate_window("otp:user@example.com", 1_000, 1_000),
            1
        );
    }

    #[test]
    fn rate_windows_are_independent_per_key() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(store.increment_rate_window("otp:a@example.com", 0, 1_000), 1);
        assert_eq!(store.increment_rate_window("otp:b@example.com", 0, 1_000), 1);
        assert_eq!(store.increment_rate_window("otp:a@example.com", 1, 1_000), 2);
    }

    #[test]
    fn concurrent_takers_observe_record_once() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.put_otp("user@example.com", record("user@example.com", "042773", 100));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.take_otp("user@example.com").is_some())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(false))
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
    }
}
