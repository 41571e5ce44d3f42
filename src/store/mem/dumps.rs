use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Result, ShareLock, store::DumpSource};

/// Dump listings registered per trajectory; unknown trajectories have none.
#[derive(Debug, Clone, Default)]
pub struct MemDumpSource {
    dumps: ShareLock<HashMap<String, Vec<Value>>>,
}

impl MemDumpSource {
    pub fn new() -> Self {
        Self {
            dumps: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(
        &self,
        trajectory_id: &str,
        dumps: Vec<Value>,
    ) {
        self.dumps.write().unwrap().insert(trajectory_id.to_string(), dumps);
    }
}

#[async_trait]
impl DumpSource for MemDumpSource {
    async fn list_dumps(
        &self,
        trajectory_id: &str,
    ) -> Result<Vec<Value>> {
        Ok(self.dumps.read().unwrap().get(trajectory_id).cloned().unwrap_or_default())
    }
}
