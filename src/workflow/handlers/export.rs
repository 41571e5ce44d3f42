use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::{
    PlugflowError, Result,
    common::Vars,
    exporter::ExporterRegistry,
    runtime::ExecutionContext,
    store::ObjectStorage,
    utils,
    workflow::{
        consts::RESULTS,
        handlers::{NodeHandler, mismatched},
        node::{ExportData, Node, NodeData, NodeType},
        template::resolve_json_value,
    },
};

/// Renders every exposure item through the configured exporter.
pub struct ExportHandler {
    exporters: ExporterRegistry,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl ExportHandler {
    pub fn new(
        exporters: ExporterRegistry,
        storage: Arc<dyn ObjectStorage>,
        bucket: String,
    ) -> Self {
        Self {
            exporters,
            storage,
            bucket,
        }
    }

    /// Data of an exposure item, loaded from storage when it was not kept.
    async fn load_data(
        &self,
        item: &Value,
    ) -> Result<Value> {
        if let Some(data) = item.get("data") {
            return Ok(data.clone());
        }
        let key = item["storageKey"].as_str().ok_or(PlugflowError::Handler("exposure item has neither data nor storage key".to_string()))?;
        let raw = self.storage.get(&self.bucket, key).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn export_item(
        &self,
        ctx: &ExecutionContext,
        data: &ExportData,
        slug: &str,
        options: &Value,
        item: &Value,
    ) -> Result<String> {
        let payload = self.load_data(item).await?;
        let timestep = item["timestep"].as_i64().unwrap_or_default();
        let object_path = format!(
            "trajectory-{}/analysis-{}/{}/{}/{}.{}",
            ctx.trajectory_id,
            ctx.analysis_id,
            data.export_type.folder(),
            timestep,
            slug,
            data.export_type.extension()
        );

        self.exporters.run_exporter(data.exporter, &payload, &object_path, options).await?;
        Ok(object_path)
    }
}

#[async_trait]
impl NodeHandler for ExportHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Export
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "exporter": { "type": "string" },
                "type": { "type": "string" },
                "results": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "index": { "type": "integer" },
                            "success": { "type": "boolean" },
                            "objectPath": { "type": "string" },
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
        let NodeData::Export(data) = &node.data else {
            return Err(mismatched(node, NodeType::Export));
        };

        let exposure = ctx.workflow.find_ancestor_by_type(&node.id, NodeType::Exposure).ok_or(PlugflowError::Handler(format!("export {} has no exposure ancestor", node.id)))?;
        let NodeData::Exposure(exposure_data) = &exposure.data else {
            return Err(mismatched(exposure, NodeType::Exposure));
        };
        let slug = utils::slugify(&exposure_data.name);
        let items = ctx.output(&exposure.id).and_then(|o| o.get::<Vec<Value>>(RESULTS)).unwrap_or_default();
        let options = data.options.as_ref().map(|o| resolve_json_value(ctx, o)).unwrap_or_else(|| json!({}));

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let index = item["index"].as_u64().unwrap_or_default();
            if let Some(err) = item.get("error") {
                results.push(json!({ "index": index, "success": false, "error": err }));
                continue;
            }

            match self.export_item(ctx, data, &slug, &options, &item).await {
                Ok(object_path) => {
                    info!("exported {} item {} to {}", exposure_data.name, index, object_path);
                    results.push(json!({ "index": index, "success": true, "objectPath": object_path }));
                }
                Err(e) => {
                    error!("{} failed on item {}: {}", data.exporter, index, e);
                    results.push(json!({ "index": index, "success": false, "error": e.to_string() }));
                }
            }
        }

        Ok(Vars::new().with("exporter", data.exporter).with("type", data.export_type).with(RESULTS, results))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use serde_json::json;

    use super::*;
    use crate::{
        exporter::Exporter,
        store::{MemObjectStorage, UploadBody},
        workflow::{handlers::testing::context_for, node::ExporterKind},
    };

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Value, String, Value)>>,
    }

    #[async_trait]
    impl Exporter for Recorder {
        async fn export(
            &self,
            data: &Value,
            object_path: &str,
            options: &Value,
        ) -> Result<()> {
            if data == &json!("bad") {
                return Err(PlugflowError::Exporter("unreadable mesh".to_string()));
            }
            self.calls.lock().unwrap().push((data.clone(), object_path.to_string(), options.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_export_items() {
        let mut ctx = context_for(json!({
            "nodes": [
                {"id": "args", "type": "arguments", "data": {"arguments": []}},
                {"id": "ex", "type": "exposure", "data": {"name": "Dislocation Lines", "results": "lines.json"}},
                {"id": "out", "type": "export", "data": {"exporter": "MeshExporter", "type": "glb", "options": {"scale": "{{ args.scale }}"}}}
            ],
            "edges": [
                {"id": "e1", "source": "args", "target": "ex"},
                {"id": "e2", "source": "ex", "target": "out"}
            ]
        }));
        ctx.add_output("args".to_string(), Vars::new().with("scale", 2.5));

        let storage = MemObjectStorage::new();
        storage.upload("plugins", "k/timestep-20.json", UploadBody::Bytes(b"{\"lines\":[]}".to_vec()), HashMap::new()).await.unwrap();
        ctx.add_output(
            "ex".to_string(),
            Vars::new().with("name", "Dislocation Lines").with(
                RESULTS,
                json!([
                    {"index": 0, "timestep": 10, "data": {"lines": [1]}},
                    {"index": 1, "timestep": 20, "storageKey": "k/timestep-20.json"},
                    {"index": 2, "timestep": 30, "data": "bad"},
                    {"index": 3, "error": "no payload"}
                ]),
            ),
        );

        let recorder = Arc::new(Recorder::default());
        let exporters = ExporterRegistry::new().register(ExporterKind::MeshExporter, recorder.clone());
        let node = ctx.workflow.get_node("out").unwrap().clone();
        let outputs = ExportHandler::new(exporters, Arc::new(storage), "plugins".to_string()).execute(&node, &mut ctx).await.unwrap();

        assert_eq!(outputs.get::<String>("exporter").as_deref(), Some("MeshExporter"));
        assert_eq!(outputs.get::<String>("type").as_deref(), Some("glb"));
        let results = outputs.get::<Vec<Value>>(RESULTS).unwrap();
        assert_eq!(results[0], json!({"index": 0, "success": true, "objectPath": "trajectory-traj/analysis-ana/glb/10/dislocation-lines.glb"}));
        assert_eq!(results[1]["objectPath"], json!("trajectory-traj/analysis-ana/glb/20/dislocation-lines.glb"));
        assert_eq!(results[2]["success"], json!(false));
        assert!(results[2]["error"].as_str().unwrap().contains("unreadable mesh"));
        assert_eq!(results[3], json!({"index": 3, "success": false, "error": "no payload"}));

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, json!({"lines": []}));
        assert_eq!(calls[0].2, json!({"scale": 2.5}));
    }
}
