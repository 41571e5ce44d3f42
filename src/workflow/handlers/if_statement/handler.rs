use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::models::{Condition, ConditionType};
use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    workflow::{
        consts::IF_STATEMENT_RESULT,
        handlers::{NodeHandler, mismatched},
        node::{Node, NodeData, NodeType},
        template::resolve_template,
    },
};

pub struct IfStatementHandler;

impl IfStatementHandler {
    /// Left fold over `conditions`; the first combinator has nothing to join.
    pub fn evaluate(
        ctx: &ExecutionContext,
        conditions: &[Condition],
    ) -> bool {
        let mut iter = conditions.iter().map(|c| (c.combinator, Self::check(ctx, c)));
        let Some((_, first)) = iter.next() else {
            return true;
        };

        iter.fold(first, |acc, (combinator, passed)| match combinator {
            ConditionType::And => acc && passed,
            ConditionType::Or => acc || passed,
        })
    }

    fn check(
        ctx: &ExecutionContext,
        condition: &Condition,
    ) -> bool {
        let left = resolve_template(ctx, &condition.left_expression);
        let right = resolve_template(ctx, &condition.right_expression);
        condition.handler.compare(left.trim(), right.trim())
    }
}

#[async_trait]
impl NodeHandler for IfStatementHandler {
    fn node_type(&self) -> NodeType {
        NodeType::IfStatement
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": { "type": "boolean" }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::IfStatement(data) = &node.data else {
            return Err(mismatched(node, NodeType::IfStatement));
        };

        let result = Self::evaluate(ctx, &data.conditions);
        debug!("if-statement {} -> {}", node.id, result);
        Ok(Vars::new().with(IF_STATEMENT_RESULT, result))
    }
}
