use serde::{Deserialize, Serialize};

use crate::{
    PlugflowError, Result,
    model::{EdgeModel, NodeModel},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowModel {
    #[serde(default)]
    pub id: String,
    pub nodes: Vec<NodeModel>,
    pub edges: Vec<EdgeModel>,
}

impl WorkflowModel {
    pub fn from_json(s: &str) -> Result<Self> {
        let workflow = serde_json::from_str::<WorkflowModel>(s);
        match workflow {
            Ok(v) => Ok(v),
            Err(e) => Err(PlugflowError::Workflow(format!("{}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_editor_document() {
        let json = r#"{
            "id": "wf",
            "nodes": [
                {"id": "fe", "type": "foreach", "position": {"x": 10, "y": 20}, "data": {"forEach": {"iterableSource": "ctx.trajectory_dumps"}}}
            ],
            "edges": [
                {"id": "e1", "source": "if", "target": "fe", "sourceHandle": "output-true"}
            ],
            "viewport": {"x": 0, "y": 0, "zoom": 1}
        }"#;
        let model = WorkflowModel::from_json(json).unwrap();
        assert_eq!(model.nodes[0].node_type, "foreach");
        assert_eq!(model.nodes[0].position.y, 20.0);
        assert_eq!(model.edges[0].source_handle.as_deref(), Some("output-true"));
        assert!(model.edges[0].target_handle.is_none());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = WorkflowModel::from_json("{\"nodes\": 3}").unwrap_err();
        assert!(matches!(err, PlugflowError::Workflow(_)));
    }
}
