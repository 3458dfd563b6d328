//! Folder listing cache
//!
//! Listings are keyed by `(method, path, access token, site)` so a token
//! refresh or a site switch never serves another session's data. Every fetch
//! and every invalidation draws a number from one monotonically increasing
//! sequence:
//!
//! - a slot is *fresh* when its stored value came from a fetch that started
//!   after the slot's latest invalidation;
//! - a completed fetch is stored only if it started after the latest
//!   invalidation and after the fetch that produced the current value.
//!
//! A slow fetch that was overtaken by an invalidation (or by a newer fetch) is
//! therefore dropped instead of overwriting newer data.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use http::Method;
use tracing::{debug, warn};

use crate::api::FolderEntry;
use crate::error::{BError, ErrorKind};

/// A cached outcome: the last successful or last failing listing.
pub type Listing = Result<Arc<Vec<FolderEntry>>, BError>;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub path: String,
    access_token: String,
    pub site: String,
}

impl CacheKey {
    pub fn new(method: Method, path: impl Into<String>, access_token: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            access_token: access_token.into(),
            site: site.into(),
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/storage/{}", self.method, self.site, self.path)
    }
}

#[derive(Default)]
struct Slot {
    value: Option<Listing>,
    fetched_seq: u64,
    invalidated_seq: u64,
}

impl Slot {
    fn is_fresh(&self) -> bool {
        self.value.is_some() && self.fetched_seq > self.invalidated_seq
    }
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<CacheKey, Slot>,
    seq: u64,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Default)]
pub struct FolderCache {
    inner: Mutex<CacheInner>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The cached listing, only if it is fresh.
    pub fn lookup(&self, key: &CacheKey) -> Option<Listing> {
        let inner = self.lock();
        inner
            .slots
            .get(key)
            .filter(|slot| slot.is_fresh())
            .and_then(|slot| slot.value.clone())
    }

    /// The cached listing even if stale, for showing something while a
    /// refetch is in flight.
    pub fn peek(&self, key: &CacheKey) -> Option<Listing> {
        self.lock().slots.get(key).and_then(|slot| slot.value.clone())
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.value.is_some() && !slot.is_fresh())
    }

    /// Reserve a sequence number for a fetch of `key` about to start.
    pub fn begin_fetch(&self, key: &CacheKey) -> u64 {
        let mut inner = self.lock();
        let seq = inner.next_seq();
        inner.slots.entry(key.clone()).or_default();
        seq
    }

    /// Store a fetch result unless something newer happened since `seq`, or
    /// the slot was dropped by a clear or a token change in the meantime.
    /// Returns whether the value was stored.
    pub fn complete_fetch(&self, key: &CacheKey, seq: u64, value: Listing) -> bool {
        let mut inner = self.lock();
        let Some(slot) = inner.slots.get_mut(key) else {
            debug!("Slot for {:?} is gone, dropping fetch {}", key, seq);
            return false;
        };
        if seq <= slot.invalidated_seq || seq <= slot.fetched_seq {
            warn!("Dropping outdated listing for {:?} (fetch {})", key, seq);
            return false;
        }
        slot.value = Some(value);
        slot.fetched_seq = seq;
        true
    }

    /// Mark `key` stale. Fetches already in flight for it will be discarded.
    /// Keys that were never read are left alone. Returns whether a value was
    /// cached (and so is worth refetching).
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.lock();
        if !inner.slots.contains_key(key) {
            return false;
        }
        let seq = inner.next_seq();
        let Some(slot) = inner.slots.get_mut(key) else {
            return false;
        };
        slot.invalidated_seq = seq;
        debug!("Invalidated {:?} at {}", key, seq);
        slot.value.is_some()
    }

    /// Drop every slot keyed by an access token other than `access_token`.
    pub fn retain_token(&self, access_token: &str) {
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|key, _| key.access_token == access_token);
        let dropped = before - inner.slots.len();
        if dropped > 0 {
            debug!("Dropped {} listing(s) cached under a previous token", dropped);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().slots.values().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a listing outcome came from a server answer worth remembering.
/// Failures where no usable response arrived are retried on the next read.
pub fn is_cacheable(listing: &Listing) -> bool {
    match listing {
        Ok(_) => true,
        Err(err) => matches!(
            err.kind(),
            ErrorKind::NotFound | ErrorKind::Unauthorized | ErrorKind::LoadFolderFailed | ErrorKind::ServerError
        ),
    }
}

/// Case-insensitive name order, lowercase first when names differ only in case.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

/// Folders first, then by name.
pub fn sort_entries(entries: &mut [FolderEntry]) {
    entries.sort_by(|a, b| {
        a.is_file
            .cmp(&b.is_file)
            .then_with(|| compare_names(&a.name, &b.name))
    });
}
