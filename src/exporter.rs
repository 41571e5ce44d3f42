//! Exporter port.
//!
//! Concrete exporters (mesh, atoms, charts, dislocations) live outside the
//! engine; the export handler reaches them through [`ExporterRegistry::run_exporter`].

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{PlugflowError, Result, workflow::node::ExporterKind};

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Render `data` and store the artifact at `object_path`.
    async fn export(
        &self,
        data: &Value,
        object_path: &str,
        options: &Value,
    ) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct ExporterRegistry {
    exporters: HashMap<ExporterKind, Arc<dyn Exporter>>,
}

impl ExporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        kind: ExporterKind,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        self.exporters.insert(kind, exporter);
        self
    }

    pub fn contains(
        &self,
        kind: ExporterKind,
    ) -> bool {
        self.exporters.contains_key(&kind)
    }

    pub async fn run_exporter(
        &self,
        kind: ExporterKind,
        data: &Value,
        object_path: &str,
        options: &Value,
    ) -> Result<()> {
        let exporter = self.exporters.get(&kind).ok_or(PlugflowError::Exporter(format!("no exporter registered for {}", kind)))?;
        debug!("run {} -> {}", kind, object_path);
        exporter.export(data, object_path, options).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Reject;

    #[async_trait]
    impl Exporter for Reject {
        async fn export(
            &self,
            _data: &Value,
            object_path: &str,
            _options: &Value,
        ) -> Result<()> {
            Err(PlugflowError::Exporter(format!("cannot export {}", object_path)))
        }
    }

    #[tokio::test]
    async fn test_run_exporter() {
        let registry = ExporterRegistry::new().register(ExporterKind::ChartExporter, Arc::new(Reject));
        assert!(registry.contains(ExporterKind::ChartExporter));

        let err = registry.run_exporter(ExporterKind::ChartExporter, &json!([]), "a/b.png", &json!({})).await.unwrap_err();
        assert_eq!(err, PlugflowError::Exporter("cannot export a/b.png".to_string()));

        let err = registry.run_exporter(ExporterKind::MeshExporter, &json!([]), "a/b.glb", &json!({})).await.unwrap_err();
        assert!(matches!(err, PlugflowError::Exporter(_)));
    }
}
