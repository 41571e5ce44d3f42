use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;

use crate::{Result, ShareLock, common::TtlCache, store::StatusStore};

const STATUS_CACHE_SIZE: usize = 100_000;

/// Status store with per-key TTL (moka) and plain member sets.
#[derive(Clone)]
pub struct MemStatusStore {
    values: TtlCache<String, String>,
    sets: ShareLock<HashMap<String, BTreeSet<String>>>,
}

impl Default for MemStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStatusStore {
    pub fn new() -> Self {
        Self {
            values: TtlCache::new(STATUS_CACHE_SIZE),
            sets: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl StatusStore for MemStatusStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<()> {
        self.values.set(key.to_string(), value, ttl);
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self.values.get(&key.to_string()))
    }

    async fn add_to_set(
        &self,
        set: &str,
        member: &str,
    ) -> Result<()> {
        self.sets.write().unwrap().entry(set.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn set_members(
        &self,
        set: &str,
    ) -> Result<Vec<String>> {
        Ok(self.sets.read().unwrap().get(set).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }
}
