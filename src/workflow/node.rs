use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    PlugflowError, Result,
    model::{NodeModel, Position},
    workflow::handlers::if_statement::Condition,
};

/// node id
pub type NodeId = String;

/// Kind of a workflow node; selects both the payload shape and the handler.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display, strum::EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NodeType {
    Modifier,
    Arguments,
    Context,
    #[serde(rename = "foreach")]
    #[strum(serialize = "foreach")]
    ForEach,
    Entrypoint,
    Exposure,
    Schema,
    Visualizers,
    Export,
    IfStatement,
}

impl NodeType {
    /// Key the editor nests this type's payload under inside `data`.
    pub fn data_key(&self) -> &'static str {
        match self {
            NodeType::Modifier => "modifier",
            NodeType::Arguments => "arguments",
            NodeType::Context => "context",
            NodeType::ForEach => "forEach",
            NodeType::Entrypoint => "entrypoint",
            NodeType::Exposure => "exposure",
            NodeType::Schema => "schema",
            NodeType::Visualizers => "visualizers",
            NodeType::Export => "export",
            NodeType::IfStatement => "ifStatement",
        }
    }

    /// JSON schema the node payload must satisfy.
    pub fn data_schema(&self) -> Value {
        match self {
            NodeType::Modifier => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "icon": { "type": "string" },
                    "author": { "type": "string" },
                    "license": { "type": "string" },
                    "version": { "type": "string" },
                    "homepage": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["name"]
            }),
            NodeType::Arguments => json!({
                "type": "object",
                "properties": {
                    "arguments": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "argument": { "type": "string", "minLength": 1 },
                                "type": { "type": "string", "enum": ["select", "number", "frame", "boolean", "string"] },
                                "label": { "type": "string" }
                            },
                            "required": ["argument", "type"]
                        }
                    }
                },
                "required": ["arguments"]
            }),
            NodeType::Context => json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string", "enum": ["trajectory-dumps"] }
                },
                "required": ["source"]
            }),
            NodeType::ForEach => json!({
                "type": "object",
                "properties": {
                    "iterableSource": { "type": "string", "minLength": 1 }
                },
                "required": ["iterableSource"]
            }),
            NodeType::Entrypoint => json!({
                "type": "object",
                "properties": {
                    "binary": { "type": "string", "minLength": 1 },
                    "arguments": { "type": "string" },
                    "timeoutMs": { "type": "integer", "minimum": 1 }
                },
                "required": ["binary"]
            }),
            NodeType::Exposure => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "results": { "type": "string", "minLength": 1 },
                    "iterable": { "type": "string" }
                },
                "required": ["name", "results"]
            }),
            NodeType::Schema => json!({
                "type": "object",
                "properties": {
                    "definition": { "type": "object" }
                },
                "required": ["definition"]
            }),
            NodeType::Visualizers => json!({
                "type": "object",
                "properties": {
                    "canvas": { "type": "boolean" },
                    "raster": { "type": "boolean" },
                    "listingTitle": { "type": "string" },
                    "listing": { "type": "object", "additionalProperties": { "type": "string" } },
                    "perAtomProperties": { "type": "array", "items": { "type": "string" } }
                }
            }),
            NodeType::Export => json!({
                "type": "object",
                "properties": {
                    "exporter": { "type": "string", "enum": ["AtomisticExporter", "MeshExporter", "DislocationExporter", "ChartExporter"] },
                    "type": { "type": "string", "enum": ["glb", "chart-png"] },
                    "options": { "type": "object" }
                },
                "required": ["exporter", "type"]
            }),
            NodeType::IfStatement => json!({
                "type": "object",
                "properties": {
                    "conditions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["and", "or"] },
                                "leftExpression": { "type": "string" },
                                "handler": { "type": "string", "enum": ["is-equal-to", "is-not-equal-to"] },
                                "rightExpression": { "type": "string" }
                            },
                            "required": ["leftExpression", "handler", "rightExpression"]
                        }
                    }
                },
                "required": ["conditions"]
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModifierData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArgumentType {
    Select,
    Number,
    Frame,
    Boolean,
    String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArgumentOption {
    pub key: String,
    pub label: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArgumentDefinition {
    pub argument: String,
    #[serde(rename = "type")]
    pub arg_type: ArgumentType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub options: Option<Vec<ArgumentOption>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArgumentsData {
    pub arguments: Vec<ArgumentDefinition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ContextSource {
    TrajectoryDumps,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContextData {
    pub source: ContextSource,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForEachData {
    /// `nodeId.path` reference to the array to iterate.
    pub iterable_source: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntrypointData {
    pub binary: String,
    /// Argument template, split on spaces after resolution.
    #[serde(default)]
    pub arguments: String,
    #[serde(default, alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExposureData {
    pub name: String,
    /// Suffix of the file the entrypoint writes next to its output path.
    pub results: String,
    #[serde(default)]
    pub iterable: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchemaData {
    pub definition: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisualizersData {
    #[serde(default)]
    pub canvas: Option<bool>,
    #[serde(default)]
    pub raster: Option<bool>,
    #[serde(default)]
    pub listing_title: Option<String>,
    /// column path -> column label
    #[serde(default)]
    pub listing: Option<Map<String, Value>>,
    #[serde(default)]
    pub per_atom_properties: Option<Vec<String>>,
}

impl VisualizersData {
    pub fn has_listing(&self) -> bool {
        self.listing.as_ref().is_some_and(|l| !l.is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
pub enum ExporterKind {
    AtomisticExporter,
    MeshExporter,
    DislocationExporter,
    ChartExporter,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExportType {
    Glb,
    ChartPng,
}

impl ExportType {
    /// Directory segment of the object path.
    pub fn folder(&self) -> &'static str {
        match self {
            ExportType::Glb => "glb",
            ExportType::ChartPng => "charts",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportType::Glb => "glb",
            ExportType::ChartPng => "png",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExportData {
    pub exporter: ExporterKind,
    #[serde(rename = "type")]
    pub export_type: ExportType,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IfStatementData {
    pub conditions: Vec<Condition>,
}

/// Typed payload of a node, one variant per [`NodeType`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Modifier(ModifierData),
    Arguments(ArgumentsData),
    Context(ContextData),
    ForEach(ForEachData),
    Entrypoint(EntrypointData),
    Exposure(ExposureData),
    Schema(SchemaData),
    Visualizers(VisualizersData),
    Export(ExportData),
    IfStatement(IfStatementData),
}

impl NodeData {
    /// Validate `payload` against the type's schema and decode it.
    pub fn parse(
        node_type: NodeType,
        payload: Value,
    ) -> Result<Self> {
        jsonschema::validate(&node_type.data_schema(), &payload).map_err(|e| PlugflowError::Validation(format!("invalid {} data: {}", node_type, e)))?;

        let data = match node_type {
            NodeType::Modifier => NodeData::Modifier(serde_json::from_value(payload)?),
            NodeType::Arguments => NodeData::Arguments(serde_json::from_value(payload)?),
            NodeType::Context => NodeData::Context(serde_json::from_value(payload)?),
            NodeType::ForEach => NodeData::ForEach(serde_json::from_value(payload)?),
            NodeType::Entrypoint => NodeData::Entrypoint(serde_json::from_value(payload)?),
            NodeType::Exposure => NodeData::Exposure(serde_json::from_value(payload)?),
            NodeType::Schema => NodeData::Schema(serde_json::from_value(payload)?),
            NodeType::Visualizers => NodeData::Visualizers(serde_json::from_value(payload)?),
            NodeType::Export => NodeData::Export(serde_json::from_value(payload)?),
            NodeType::IfStatement => NodeData::IfStatement(serde_json::from_value(payload)?),
        };
        Ok(data)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Modifier(_) => NodeType::Modifier,
            NodeData::Arguments(_) => NodeType::Arguments,
            NodeData::Context(_) => NodeType::Context,
            NodeData::ForEach(_) => NodeType::ForEach,
            NodeData::Entrypoint(_) => NodeType::Entrypoint,
            NodeData::Exposure(_) => NodeType::Exposure,
            NodeData::Schema(_) => NodeType::Schema,
            NodeData::Visualizers(_) => NodeType::Visualizers,
            NodeData::Export(_) => NodeType::Export,
            NodeData::IfStatement(_) => NodeType::IfStatement,
        }
    }
}

/// Immutable runtime node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    /// editor only, never read by the engine
    pub position: Position,
    pub data: NodeData,
}

impl Node {
    pub fn new(model: &NodeModel) -> Result<Self> {
        let node_type = NodeType::from_str(&model.node_type).map_err(|_| PlugflowError::Node(format!("node {}: unknown type '{}'", model.id, model.node_type)))?;

        // the editor nests the payload under its type key; accept both shapes
        let payload = match model.data.get(node_type.data_key()) {
            Some(nested) if nested.is_object() => nested.clone(),
            _ => model.data.clone(),
        };
        let data = NodeData::parse(node_type, payload).map_err(|e| match e {
            PlugflowError::Validation(msg) => PlugflowError::Validation(format!("node {}: {}", model.id, msg)),
            other => PlugflowError::Node(format!("node {}: {}", model.id, other)),
        })?;

        Ok(Self {
            id: model.id.clone(),
            node_type,
            position: model.position,
            data,
        })
    }
}
