//! Local geo cache of resource records (hospitals, shelters, water points...).
//!
//! Entries expire `ttl_ms` after the refresh that fetched them. Expired entries
//! are never served, whether or not [`GeoCache::load`] has evicted them yet.

use crate::clock::Clock;
use crate::events::{EventBus, SyncEvent};
use crate::geo::{haversine_meters, LatLng};
use crate::store::{keys, Store};
use crate::sync::{RemoteApi, ResourceRecord};
use crate::{FixerError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// A cached resource record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub name: String,
    pub location: LatLng,
    pub resource_type: String,
    pub status: String,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Unix timestamp in milliseconds of the refresh that fetched this entry.
    pub cached_at: i64,
}

impl CacheEntry {
    fn from_record(record: ResourceRecord, cached_at: i64) -> Self {
        Self {
            id: record.id,
            name: record.name,
            location: record.location,
            resource_type: record.resource_type,
            status: record.status,
            details: record.details,
            cached_at,
        }
    }

    pub fn is_valid(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.cached_at < ttl_ms
    }
}

pub struct GeoCache {
    entries: Mutex<Vec<CacheEntry>>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    type_filter: Option<String>,
    events: EventBus,
}

impl GeoCache {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
        type_filter: Option<String>,
        events: EventBus,
    ) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            store,
            clock,
            ttl_ms,
            type_filter,
            events,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| FixerError::LockPoisoned("geo cache".to_string()))
    }

    /// Restore persisted entries, evicting expired ones. Returns the number evicted.
    pub fn load(&self) -> Result<usize> {
        let persisted: Vec<CacheEntry> = self
            .store
            .load(keys::CACHE_RESOURCES)?
            .unwrap_or_default();
        let now = self.clock.now_ms();
        let total = persisted.len();
        let valid: Vec<CacheEntry> = persisted
            .into_iter()
            .filter(|entry| entry.is_valid(now, self.ttl_ms))
            .collect();
        let evicted = total - valid.len();

        let mut entries = self.lock()?;
        if evicted > 0 {
            self.store.save(keys::CACHE_RESOURCES, &valid)?;
            info!(evicted, remaining = valid.len(), "Evicted expired cache entries");
            self.events.emit(SyncEvent::CacheEvicted { evicted });
        }
        *entries = valid;
        Ok(evicted)
    }

    /// Replace the cache wholesale with a fresh fetch. Returns the entry count.
    ///
    /// On failure the previous contents are left untouched.
    pub async fn refresh(&self, api: &dyn RemoteApi) -> Result<usize> {
        let records = api.list_resources(self.type_filter.clone()).await?;
        let now = self.clock.now_ms();
        let fresh: Vec<CacheEntry> = records
            .into_iter()
            .filter(|record| record.location.is_finite())
            .map(|record| CacheEntry::from_record(record, now))
            .collect();
        let count = fresh.len();

        let mut entries = self.lock()?;
        self.store.save(keys::CACHE_RESOURCES, &fresh)?;
        *entries = fresh;
        drop(entries);

        debug!(entries = count, "Refreshed geo cache");
        self.events.emit(SyncEvent::CacheRefreshed { entries: count });
        Ok(count)
    }

    fn valid_entries(&self) -> Result<Vec<CacheEntry>> {
        let now = self.clock.now_ms();
        Ok(self
            .lock()?
            .iter()
            .filter(|entry| entry.is_valid(now, self.ttl_ms))
            .cloned()
            .collect())
    }

    /// Valid entries within `radius_m` of `center`, nearest first.
    pub fn query(&self, center: LatLng, radius_m: f64) -> Result<Vec<CacheEntry>> {
        let mut hits: Vec<(f64, CacheEntry)> = self
            .valid_entries()?
            .into_iter()
            .map(|entry| (haversine_meters(center, entry.location), entry))
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(hits.into_iter().map(|(_, entry)| entry).collect())
    }

    /// All valid entries.
    pub fn all(&self) -> Result<Vec<CacheEntry>> {
        self.valid_entries()
    }

    /// Up to `limit` valid entries closest to `center`, with their distance in
    /// meters, optionally restricted to one resource type.
    pub fn nearest(
        &self,
        center: LatLng,
        resource_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(CacheEntry, f64)>> {
        let mut ranked: Vec<(CacheEntry, f64)> = self
            .valid_entries()?
            .into_iter()
            .filter(|entry| resource_type.map_or(true, |t| entry.resource_type == t))
            .map(|entry| {
                let distance = haversine_meters(center, entry.location);
                (entry, distance)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Number of valid entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.valid_entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
