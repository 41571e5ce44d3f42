use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{
    PlugflowError, Result, ShareLock,
    store::{
        ExposureMetaRepository,
        data::{ExposureMeta, ExposureMetaQuery},
    },
    utils,
};

#[derive(Debug, Clone, Default)]
pub struct MemExposureMetaRepository {
    docs: ShareLock<Vec<ExposureMeta>>,
}

impl MemExposureMetaRepository {
    pub fn new() -> Self {
        Self {
            docs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn all(&self) -> Vec<ExposureMeta> {
        self.docs.read().unwrap().clone()
    }
}

#[async_trait]
impl ExposureMetaRepository for MemExposureMetaRepository {
    async fn find_one(
        &self,
        query: &ExposureMetaQuery,
    ) -> Result<Option<ExposureMeta>> {
        Ok(self.docs.read().unwrap().iter().find(|d| query.matches(d)).cloned())
    }

    async fn create(
        &self,
        mut doc: ExposureMeta,
    ) -> Result<ExposureMeta> {
        if doc.id.is_empty() {
            doc.id = utils::longid();
        }
        self.docs.write().unwrap().push(doc.clone());
        Ok(doc)
    }

    async fn update_by_id(
        &self,
        id: &str,
        mut doc: ExposureMeta,
    ) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        let existing = docs.iter_mut().find(|d| d.id == id).ok_or(PlugflowError::Store(format!("exposure meta {} not found", id)))?;
        doc.id = id.to_string();
        *existing = doc;
        Ok(())
    }
}
