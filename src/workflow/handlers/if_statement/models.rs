use serde::{Deserialize, Serialize};

/// How a condition joins the value accumulated so far.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConditionType {
    #[default]
    And,
    Or,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConditionHandler {
    IsEqualTo,
    IsNotEqualTo,
}

impl ConditionHandler {
    pub fn compare(
        &self,
        left: &str,
        right: &str,
    ) -> bool {
        match self {
            ConditionHandler::IsEqualTo => left == right,
            ConditionHandler::IsNotEqualTo => left != right,
        }
    }
}

/// One comparison of an if-statement; both expressions are templates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", default)]
    pub combinator: ConditionType,
    pub left_expression: String,
    pub handler: ConditionHandler,
    pub right_expression: String,
}
