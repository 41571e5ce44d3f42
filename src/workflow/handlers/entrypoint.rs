use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{error, info};

use crate::{
    PlugflowError, Result,
    common::Vars,
    runtime::ExecutionContext,
    utils,
    workflow::{
        consts::{FAIL_COUNT, FOR_EACH_CURRENT_INDEX, FOR_EACH_CURRENT_VALUE, FOR_EACH_ITEMS, FOR_EACH_OUTPUT_PATH, RESULTS, SUCCESS_COUNT},
        handlers::{NodeHandler, mismatched},
        node::{Node, NodeData, NodeType},
        template::{parse_argument_string, resolve_template},
    },
};

/// Outcome of one binary run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResult {
    index: usize,
    input: Value,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Runs the plugin binary once per iteration item.
///
/// A failed or timed out run is recorded in `results` and never stops the
/// remaining items.
pub struct EntrypointHandler {
    plugins_dir: PathBuf,
    temp_dir: PathBuf,
    default_timeout: Duration,
}

impl EntrypointHandler {
    pub fn new(
        plugins_dir: PathBuf,
        temp_dir: PathBuf,
        default_timeout: Duration,
    ) -> Self {
        Self {
            plugins_dir,
            temp_dir,
            default_timeout,
        }
    }

    fn binary_path(
        &self,
        slug: &str,
        binary: &str,
    ) -> PathBuf {
        let binary = Path::new(binary);
        if binary.is_absolute() { binary.to_path_buf() } else { self.plugins_dir.join(slug).join(binary) }
    }

    async fn run(
        &self,
        binary: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<()> {
        let child = Command::new(binary).args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true).output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| PlugflowError::Entrypoint(format!("{} timed out after {}ms", binary.display(), timeout.as_millis())))?
            .map_err(|e| PlugflowError::Entrypoint(format!("{}: {}", binary.display(), e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
        Err(PlugflowError::Entrypoint(format!("{} exited with {}: {}", binary.display(), code, stderr.trim())))
    }
}

#[async_trait]
impl NodeHandler for EntrypointHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Entrypoint
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "results": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "index": { "type": "integer" },
                            "input": {},
                            "success": { "type": "boolean" },
                            "outputPath": { "type": "string" },
                            "error": { "type": "string" }
                        }
                    }
                },
                "successCount": { "type": "integer" },
                "failCount": { "type": "integer" }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Entrypoint(data) = &node.data else {
            return Err(mismatched(node, NodeType::Entrypoint));
        };

        let for_each_id = ctx
            .workflow
            .find_parent_by_type(&node.id, NodeType::ForEach)
            .map(|n| n.id.clone())
            .ok_or(PlugflowError::Handler(format!("entrypoint {} must be connected to a foreach", node.id)))?;
        let for_each = ctx.output(&for_each_id).ok_or(PlugflowError::Handler(format!("foreach {} has not run", for_each_id)))?;

        // an injected item means this is one job of a fan-out; otherwise run the whole set
        let current_index = for_each.get::<i64>(FOR_EACH_CURRENT_INDEX).unwrap_or(-1);
        let runs: Vec<(usize, Value)> = if current_index >= 0 {
            vec![(current_index as usize, for_each.get_value(FOR_EACH_CURRENT_VALUE).cloned().unwrap_or(Value::Null))]
        } else {
            for_each.get::<Vec<Value>>(FOR_EACH_ITEMS).unwrap_or_default().into_iter().enumerate().collect()
        };

        let binary = self.binary_path(&ctx.plugin_slug, &data.binary);
        let timeout = data.timeout_ms.map(Duration::from_millis).unwrap_or(self.default_timeout);
        let total = runs.len();
        let mut results = Vec::with_capacity(total);

        for (index, item) in runs {
            let output_path = self.temp_dir.join(format!("{}-{}-{}-{}", ctx.plugin_slug, ctx.analysis_id, index, utils::time::time_millis()));
            let output_path_str = output_path.to_string_lossy().to_string();
            if let Some(for_each) = ctx.output_mut(&for_each_id) {
                for_each.set(FOR_EACH_CURRENT_VALUE, &item);
                for_each.set(FOR_EACH_CURRENT_INDEX, index);
                for_each.set(FOR_EACH_OUTPUT_PATH, &output_path_str);
            }
            ctx.track_file(output_path);

            let args = parse_argument_string(&resolve_template(ctx, &data.arguments));
            info!("running {} [{}/{}]", data.binary, index + 1, total);

            match self.run(&binary, &args, timeout).await {
                Ok(()) => results.push(RunResult {
                    index,
                    input: item,
                    success: true,
                    output_path: Some(output_path_str),
                    error: None,
                }),
                Err(e) => {
                    error!("binary failed for item {}: {}", index, e);
                    results.push(RunResult {
                        index,
                        input: item,
                        success: false,
                        output_path: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Ok(Vars::new().with(SUCCESS_COUNT, success_count).with(FAIL_COUNT, results.len() - success_count).with(RESULTS, results))
    }
}
