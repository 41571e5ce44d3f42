use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    PlugflowError, Result,
    common::Vars,
    runtime::{ExecutionContext, frame_of},
    store::{
        ExposureMetaRepository, ObjectStorage, UploadBody,
        data::{ExposureMeta, ExposureMetaQuery},
    },
    workflow::{
        consts::RESULTS,
        handlers::{NodeHandler, mismatched},
        node::{ExposureData, Node, NodeData, NodeType},
        template::get_nested_value,
    },
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExposureItem {
    index: usize,
    timestep: i64,
    storage_key: String,
    local_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    /// only known once the payload was decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

/// Publishes the payload each entrypoint run left next to its output path.
pub struct ExposureHandler {
    storage: Arc<dyn ObjectStorage>,
    metas: Arc<dyn ExposureMetaRepository>,
    bucket: String,
}

impl ExposureHandler {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        metas: Arc<dyn ExposureMetaRepository>,
        bucket: String,
    ) -> Self {
        Self {
            storage,
            metas,
            bucket,
        }
    }

    /// Whether anything below the exposure reads the decoded data.
    fn has_consumer(
        ctx: &ExecutionContext,
        node_id: &str,
    ) -> bool {
        if ctx.workflow.find_descendant_by_type(node_id, NodeType::Export).is_some() {
            return true;
        }
        matches!(
            ctx.workflow.find_descendant_by_type(node_id, NodeType::Visualizers).map(|n| &n.data),
            Some(NodeData::Visualizers(v)) if v.has_listing()
        )
    }

    async fn publish(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        data: &ExposureData,
        decode: bool,
        index: usize,
        input: &Value,
        local_path: PathBuf,
    ) -> Result<ExposureItem> {
        let timestep = frame_of(input, index);
        let storage_key = format!("plugin-{}/trajectory-{}/analysis-{}/{}/timestep-{}.json", ctx.plugin_id, ctx.trajectory_id, ctx.analysis_id, node.id, timestep);
        let metadata = HashMap::from([("content-type".to_string(), "application/json".to_string())]);

        let mut item = ExposureItem {
            index,
            timestep,
            storage_key: storage_key.clone(),
            local_path: local_path.to_string_lossy().to_string(),
            data: None,
            count: None,
        };

        if !decode {
            self.storage.upload(&self.bucket, &storage_key, UploadBody::Path(local_path), metadata).await?;
            return Ok(item);
        }

        let raw = tokio::fs::read(&local_path).await?;
        let mut payload: Value = serde_json::from_slice(&raw)?;
        if let Some(path) = &data.iterable {
            payload = get_nested_value(&payload, path).cloned().ok_or(PlugflowError::Handler(format!("path '{}' not found in {}", path, local_path.display())))?;
        }
        self.storage.upload(&self.bucket, &storage_key, UploadBody::Bytes(serde_json::to_vec(&payload)?), metadata).await?;

        let count = payload.as_array().map(|a| a.len()).unwrap_or(1);
        item.count = Some(count);
        if Self::has_consumer(ctx, &node.id) {
            self.upsert_meta(ctx, node, data, timestep, count, &payload).await?;
            item.data = Some(payload);
        }

        Ok(item)
    }

    async fn upsert_meta(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        data: &ExposureData,
        timestep: i64,
        count: usize,
        payload: &Value,
    ) -> Result<()> {
        let sample = payload.as_array().and_then(|a| a.first()).unwrap_or(payload);
        let keys: Vec<&String> = sample.as_object().map(|o| o.keys().collect()).unwrap_or_default();

        let doc = ExposureMeta {
            id: String::new(),
            analysis_id: ctx.analysis_id.clone(),
            exposure_id: node.id.clone(),
            timestep,
            plugin_id: ctx.plugin_id.clone(),
            trajectory_id: ctx.trajectory_id.clone(),
            team_id: ctx.team_id.clone(),
            name: data.name.clone(),
            metadata: json!({ "count": count, "keys": keys }),
        };
        let query = ExposureMetaQuery {
            analysis_id: doc.analysis_id.clone(),
            exposure_id: doc.exposure_id.clone(),
            timestep,
        };

        match self.metas.find_one(&query).await? {
            Some(existing) => self.metas.update_by_id(&existing.id, doc).await,
            None => self.metas.create(doc).await.map(|_| ()),
        }
    }
}

#[async_trait]
impl NodeHandler for ExposureHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Exposure
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "results": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "index": { "type": "integer" },
                            "timestep": { "type": "integer" },
                            "storageKey": { "type": "string" },
                            "localPath": { "type": "string" },
                            "data": {},
                            "count": { "type": "integer" },
                            "error": { "type": "string" }
                        }
                    }
                }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Exposure(data) = &node.data else {
            return Err(mismatched(node, NodeType::Exposure));
        };

        let entrypoint_id = ctx
            .workflow
            .find_ancestor_by_type(&node.id, NodeType::Entrypoint)
            .map(|n| n.id.clone())
            .ok_or(PlugflowError::Handler(format!("exposure {} has no entrypoint ancestor", node.id)))?;
        let runs = ctx.output(&entrypoint_id).and_then(|o| o.get::<Vec<Value>>(RESULTS)).unwrap_or_default();

        // with nobody reading the data and nothing to narrow, the file is shipped as is
        let decode = data.iterable.is_some() || Self::has_consumer(ctx, &node.id);
        let mut results = Vec::with_capacity(runs.len());

        for run in runs {
            let index = run["index"].as_u64().unwrap_or_default() as usize;
            if run["success"] != Value::Bool(true) {
                let error = run["error"].as_str().unwrap_or("entrypoint failed").to_string();
                results.push(json!({ "index": index, "error": error }));
                continue;
            }

            let Some(output_path) = run["outputPath"].as_str() else {
                results.push(json!({ "index": index, "error": "entrypoint result has no output path" }));
                continue;
            };
            let local_path = PathBuf::from(format!("{}_{}", output_path, data.results));
            ctx.track_file(local_path.clone());

            match self.publish(ctx, node, data, decode, index, &run["input"], local_path).await {
                Ok(item) => {
                    debug!("exposure {} item {} -> {}", data.name, index, item.storage_key);
                    results.push(serde_json::to_value(item)?);
                }
                Err(e) => {
                    warn!("exposure {} item {} failed: {}", data.name, index, e);
                    results.push(json!({ "index": index, "error": e.to_string() }));
                }
            }
        }

        Ok(Vars::new().with("name", &data.name).with(RESULTS, results))
    }
}
