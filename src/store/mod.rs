//! Collaborator ports the engine talks to, and in-memory implementations.
//!
//! - `ObjectStorage`: bucket/key blob storage for exposure payloads
//! - `ExposureMetaRepository`: per-timestep exposure metadata
//! - `StatusStore`: TTL key/value plus sets, backing the status tracker
//! - `DumpSource`: lists the dumps of a trajectory
//! - `WorkflowProvider`: loads a plugin's workflow definition inside a worker

pub mod data;
mod mem;

use std::{collections::HashMap, error::Error, path::PathBuf, time::Duration};

use async_trait::async_trait;
use serde_json::Value;

use crate::{PlugflowError, Result, model::WorkflowModel};

use data::{ExposureMeta, ExposureMetaQuery};

pub use mem::{MemDumpSource, MemExposureMetaRepository, MemObjectStorage, MemStatusStore, MemWorkflowProvider};

/// Maps blob backend errors to PlugflowError.
pub(crate) fn map_storage_err(err: impl Error) -> PlugflowError {
    PlugflowError::Storage(err.to_string())
}

/// What to upload: a local file or an in-memory buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadBody {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Read the whole object.
    async fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>>;

    async fn exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<bool>;
}

#[async_trait]
pub trait ExposureMetaRepository: Send + Sync {
    async fn find_one(
        &self,
        query: &ExposureMetaQuery,
    ) -> Result<Option<ExposureMeta>>;

    /// Insert a new record, returning it with its assigned id.
    async fn create(
        &self,
        doc: ExposureMeta,
    ) -> Result<ExposureMeta>;

    async fn update_by_id(
        &self,
        id: &str,
        doc: ExposureMeta,
    ) -> Result<()>;
}

/// Redis-shaped store used for job status records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<()>;

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>>;

    async fn add_to_set(
        &self,
        set: &str,
        member: &str,
    ) -> Result<()>;

    async fn set_members(
        &self,
        set: &str,
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Dumps of a trajectory, in frame order.
    async fn list_dumps(
        &self,
        trajectory_id: &str,
    ) -> Result<Vec<Value>>;
}

#[async_trait]
pub trait WorkflowProvider: Send + Sync {
    /// Workflow definition of a plugin.
    async fn load(
        &self,
        plugin_id: &str,
    ) -> Result<WorkflowModel>;
}
