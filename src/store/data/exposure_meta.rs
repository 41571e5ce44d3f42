use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-timestep metadata of one exposure, unique by `(analysis_id, exposure_id, timestep)`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExposureMeta {
    #[serde(default)]
    pub id: String,
    pub analysis_id: String,
    pub exposure_id: String,
    pub timestep: i64,
    pub plugin_id: String,
    pub trajectory_id: String,
    pub team_id: String,
    pub name: String,
    pub metadata: Value,
}

/// Upsert key of [`ExposureMeta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureMetaQuery {
    pub analysis_id: String,
    pub exposure_id: String,
    pub timestep: i64,
}

impl ExposureMetaQuery {
    pub fn matches(
        &self,
        meta: &ExposureMeta,
    ) -> bool {
        meta.analysis_id == self.analysis_id && meta.exposure_id == self.exposure_id && meta.timestep == self.timestep
    }
}
