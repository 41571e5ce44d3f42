use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    workflow::{
        consts::{ARGUMENTS_AS_ARRAY, ARGUMENTS_AS_STR},
        handlers::{NodeHandler, mismatched},
        node::{ArgumentType, Node, NodeData, NodeType},
        template::value_to_string,
    },
};

/// Turns argument definitions into command-line flags.
///
/// Value priority is preset `value`, then the user's config, then `default`.
pub struct ArgumentsHandler;

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

#[async_trait]
impl NodeHandler for ArgumentsHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Arguments
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "as_str": { "type": "string" },
                "as_array": { "type": "array", "items": { "type": "string" } }
            },
            "additionalProperties": true
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Arguments(data) = &node.data else {
            return Err(mismatched(node, NodeType::Arguments));
        };

        let mut flags: Vec<String> = Vec::new();
        let mut outputs = Vars::new();

        for def in data.arguments.iter() {
            let value = present(def.value.as_ref()).or_else(|| present(ctx.user_config.get_value(&def.argument))).or_else(|| present(def.default.as_ref())).cloned();
            outputs.set(&def.argument, &value);

            let Some(value) = value else {
                continue;
            };
            if def.arg_type == ArgumentType::Boolean {
                if value == Value::Bool(true) || value == Value::String("true".to_string()) {
                    flags.push(format!("--{}", def.argument));
                }
            } else {
                flags.push(format!("--{}", def.argument));
                flags.push(value_to_string(&value));
            }
        }

        outputs.set(ARGUMENTS_AS_STR, flags.join(" "));
        outputs.set(ARGUMENTS_AS_ARRAY, flags);
        Ok(outputs)
    }
}
