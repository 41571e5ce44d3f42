//! Template resolution against an execution context.
//!
//! A reference is written `{{ nodeId.path.to.value }}`. The first segment
//! names a node whose output is read from the context, the rest walks
//! objects and array indices. A bare `{{ nodeId }}` yields the whole output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{common::walk, runtime::ExecutionContext};

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap());

/// Resolve a `nodeId.path` reference, `None` when any segment is missing.
pub fn resolve_reference(
    ctx: &ExecutionContext,
    reference: &str,
) -> Option<Value> {
    let reference = reference.trim();
    let (node_id, path) = match reference.split_once('.') {
        Some((node_id, path)) => (node_id, Some(path)),
        None => (reference, None),
    };

    let outputs = ctx.output(node_id)?;
    match path {
        None => Some(Value::from(outputs.clone())),
        Some(path) => outputs.lookup(path).cloned(),
    }
}

/// Render scalars as plain text and objects/arrays as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace every reference in `template`; unresolved references become empty.
pub fn resolve_template(
    ctx: &ExecutionContext,
    template: &str,
) -> String {
    TEMPLATE_RE
        .replace_all(template, |caps: &regex::Captures| resolve_reference(ctx, &caps[1]).map(|v| value_to_string(&v)).unwrap_or_default())
        .into_owned()
}

/// Resolve every string inside `value`.
///
/// A string consisting of exactly one reference keeps the referenced value's
/// JSON type, so `"{{ args.scale }}"` can resolve to a number.
pub fn resolve_json_value(
    ctx: &ExecutionContext,
    value: &Value,
) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = TEMPLATE_RE.captures(s)
                && caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len())
            {
                return resolve_reference(ctx, &caps[1]).unwrap_or(Value::Null);
            }
            Value::String(resolve_template(ctx, s))
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| resolve_json_value(ctx, v)).collect()),
        Value::Object(obj) => Value::Object(obj.iter().map(|(k, v)| (k.clone(), resolve_json_value(ctx, v))).collect()),
        _ => value.clone(),
    }
}

/// Walk a dotted path inside an arbitrary JSON value.
pub fn get_nested_value<'a>(
    value: &'a Value,
    path: &str,
) -> Option<&'a Value> {
    path.split('.').filter(|s| !s.is_empty()).try_fold(value, walk)
}

/// Split a command line on spaces, honoring single and double quotes.
pub fn parse_argument_string(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            (' ', None) => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{WorkflowModel, common::Vars, workflow::Workflow};

    fn create_test_context() -> ExecutionContext {
        let model: WorkflowModel = serde_json::from_value(json!({"nodes": [], "edges": []})).unwrap();
        let mut ctx = ExecutionContext::new(Arc::new(Workflow::try_from(&model).unwrap()));
        ctx.add_output("node1".to_string(), Vars::new().with("message", "hello").with("count", 42).with("data", json!({"user": {"name": "Alice"}, "list": [1, 2]})));
        ctx.add_output("forEach".to_string(), Vars::new().with("currentValue", json!({"frame": 7})).with("outputPath", "/tmp/out-0"));
        ctx
    }

    #[test]
    fn test_resolve_template_no_variables() {
        let ctx = create_test_context();
        assert_eq!(resolve_template(&ctx, "hello world"), "hello world");
    }

    #[test]
    fn test_resolve_template_values() {
        let ctx = create_test_context();
        assert_eq!(resolve_template(&ctx, "{{ node1.message }}"), "hello");
        assert_eq!(resolve_template(&ctx, "count: {{node1.count}}"), "count: 42");
        assert_eq!(resolve_template(&ctx, "{{ node1.data.user.name }}"), "Alice");
        assert_eq!(resolve_template(&ctx, "{{ node1.data.list.1 }}"), "2");
        assert_eq!(resolve_template(&ctx, "{{ node1.data.list }}"), "[1,2]");
    }

    #[test]
    fn test_resolve_template_missing_renders_empty() {
        let ctx = create_test_context();
        assert_eq!(resolve_template(&ctx, "a{{ unknown.value }}b"), "ab");
        assert_eq!(resolve_template(&ctx, "a{{ node1.nope }}b"), "ab");
    }

    #[test]
    fn test_resolve_template_entrypoint_line() {
        let ctx = create_test_context();
        let line = resolve_template(&ctx, "{{ forEach.currentValue.frame }} {{ forEach.outputPath }} --name '{{ node1.data.user.name }} B'");
        assert_eq!(parse_argument_string(&line), vec!["7", "/tmp/out-0", "--name", "Alice B"]);
    }

    #[test]
    fn test_resolve_json_value_keeps_types() {
        let ctx = create_test_context();
        let input = json!({
            "count": "{{ node1.count }}",
            "label": "n={{ node1.count }}",
            "nested": ["{{ node1.data.user }}", 3, true],
            "missing": "{{ ghost.x }}"
        });
        assert_eq!(
            resolve_json_value(&ctx, &input),
            json!({
                "count": 42,
                "label": "n=42",
                "nested": [{"name": "Alice"}, 3, true],
                "missing": null
            })
        );
    }

    #[test]
    fn test_resolve_whole_output() {
        let ctx = create_test_context();
        let value = resolve_reference(&ctx, "forEach").unwrap();
        assert_eq!(value["outputPath"], json!("/tmp/out-0"));
    }

    #[test]
    fn test_parse_argument_string() {
        assert_eq!(parse_argument_string("  -a 1   -b \"x y\" 'z'"), vec!["-a", "1", "-b", "x y", "z"]);
        assert_eq!(parse_argument_string("say \"it's fine\""), vec!["say", "it's fine"]);
        assert!(parse_argument_string("   ").is_empty());
    }

    #[test]
    fn test_get_nested_value() {
        let value = json!({"a": {"b": [{"c": 1}]}});
        assert_eq!(get_nested_value(&value, "a.b.0.c"), Some(&json!(1)));
        assert_eq!(get_nested_value(&value, ""), Some(&value));
        assert_eq!(get_nested_value(&value, "a.x"), None);
    }
}
