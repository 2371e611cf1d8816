/// `{{path.to.value}}` template resolution against the accumulated execution context
///
/// Placeholders are looked up by dotted path; numeric segments index into arrays.
/// A placeholder whose path does not resolve is left in place verbatim, and a condition
/// containing one is falsy.

use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Resolve placeholders in every string inside `value`, recursing into arrays and objects
///
/// Values without placeholders come back unchanged.
pub fn resolve_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(template) => Value::String(resolve_str(template, context)),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_value(item, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_value(item, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace each resolvable `{{path}}` in `template` with the stringified value
pub fn resolve_str(template: &str, context: &Value) -> String {
    resolve_str_tracked(template, context).0
}

/// Like `resolve_str`, also reporting whether every placeholder in `template` resolved
///
/// Only placeholders written in the template count. Braces that arrive inside
/// substituted values are data and never mark the result as unresolved.
pub fn resolve_str_tracked(template: &str, context: &Value) -> (String, bool) {
    if !template.contains(OPEN) {
        return (template.to_string(), true);
    }

    let mut resolved = String::with_capacity(template.len());
    let mut complete = true;
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let inner_start = start + OPEN.len();
        let Some(inner_len) = rest[inner_start..].find(CLOSE) else {
            break;
        };
        let placeholder_end = inner_start + inner_len + CLOSE.len();

        resolved.push_str(&rest[..start]);
        let path = rest[inner_start..inner_start + inner_len].trim();
        match lookup(context, path) {
            Some(value) => resolved.push_str(&stringify(value)),
            None => {
                complete = false;
                resolved.push_str(&rest[start..placeholder_end]);
            }
        }
        rest = &rest[placeholder_end..];
    }

    resolved.push_str(rest);
    (resolved, complete)
}

/// Dotted-path lookup, e.g. `patient.phones.0`
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

/// Strings are inserted raw, null as empty, everything else as compact JSON
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Boolean coercion of resolved text: empty, whitespace and `"0"` are falsy
pub fn is_truthy(resolved: &str) -> bool {
    let text = resolved.trim();
    !(text.is_empty() || text == "0")
}

/// Resolve a condition template and coerce it to a boolean
///
/// A template with any unresolved placeholder is falsy. Returns the resolved text too.
pub fn evaluate_condition_text(condition: &str, context: &Value) -> (String, bool) {
    let (resolved, complete) = resolve_str_tracked(condition, context);
    let truthy = complete && is_truthy(&resolved);
    (resolved, truthy)
}

pub fn evaluate_condition(condition: &str, context: &Value) -> bool {
    evaluate_condition_text(condition, context).1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "patient": {
                "name": "Ana",
                "age": 42,
                "vip": true,
                "phones": ["555-0100", "555-0199"],
                "notes": null
            },
            "count": 0
        })
    }

    #[test]
    fn resolves_nested_paths_and_array_indices() {
        let ctx = context();
        assert_eq!(resolve_str("Hello {{patient.name}}", &ctx), "Hello Ana");
        assert_eq!(resolve_str("{{ patient.age }} years", &ctx), "42 years");
        assert_eq!(resolve_str("call {{patient.phones.1}}", &ctx), "call 555-0199");
        assert_eq!(resolve_str("{{patient.phones}}", &ctx), r#"["555-0100","555-0199"]"#);
        assert_eq!(resolve_str("[{{patient.notes}}]", &ctx), "[]");
    }

    #[test]
    fn leaves_unresolved_placeholders_in_place() {
        let ctx = context();
        assert_eq!(resolve_str("{{patient.email}} / {{patient.name}}", &ctx), "{{patient.email}} / Ana");
        assert_eq!(resolve_str("{{}}", &ctx), "{{}}");
        assert_eq!(resolve_str("dangling {{patient.name", &ctx), "dangling {{patient.name");
        assert_eq!(resolve_str("{{patient.name.first}}", &ctx), "{{patient.name.first}}");
    }

    #[test]
    fn resolves_recursively_through_values() {
        let ctx = context();
        let template = json!({
            "to": "{{patient.phones.0}}",
            "lines": ["Dear {{patient.name}}", 7, null],
            "meta": { "vip": "{{patient.vip}}" }
        });

        assert_eq!(
            resolve_value(&template, &ctx),
            json!({
                "to": "555-0100",
                "lines": ["Dear Ana", 7, null],
                "meta": { "vip": "true" }
            })
        );
    }

    #[test]
    fn values_without_placeholders_are_unchanged() {
        let ctx = context();
        let plain = json!({ "a": [1, "two", { "three": false }], "b": "no braces here", "c": null });
        assert_eq!(resolve_value(&plain, &ctx), plain);
        assert_eq!(resolve_value(&resolve_value(&plain, &ctx), &ctx), plain);
        assert_eq!(resolve_str("single { brace }", &ctx), "single { brace }");
    }

    #[test]
    fn truthiness_rules() {
        assert!(!is_truthy(""));
        assert!(!is_truthy("   "));
        assert!(!is_truthy("0"));
        assert!(is_truthy("1"));
        assert!(is_truthy("yes"));
        assert!(is_truthy("00"));
        assert!(is_truthy("true"));
        assert!(is_truthy("false"));
        assert!(is_truthy("FALSE"));
    }

    #[test]
    fn conditions_coerce_resolved_values() {
        let ctx = context();
        assert!(evaluate_condition("{{patient.name}}", &ctx));
        assert!(evaluate_condition("{{patient.vip}}", &ctx));
        assert!(!evaluate_condition("{{count}}", &ctx));
        assert!(!evaluate_condition("{{patient.notes}}", &ctx));
        assert!(!evaluate_condition("{{patient.unknown}}", &ctx));
        assert!(!evaluate_condition("{{patient.name}} {{patient.unknown}}", &ctx));
        assert!(evaluate_condition("{{status}}", &json!({ "status": "false" })));
    }

    #[test]
    fn braces_inside_resolved_data_are_not_unresolved() {
        let ctx = json!({ "note": "reply with {{code}} please" });

        let (resolved, complete) = resolve_str_tracked("{{note}}", &ctx);
        assert_eq!(resolved, "reply with {{code}} please");
        assert!(complete);
        assert!(evaluate_condition("{{note}}", &ctx));

        let (_, complete) = resolve_str_tracked("{{note}} {{missing}}", &ctx);
        assert!(!complete);
        assert_eq!(evaluate_condition_text("{{missing}}", &ctx), ("{{missing}}".to_string(), false));
    }

    #[test]
    fn literal_braces_without_placeholders_count_as_resolved() {
        let ctx = context();
        assert_eq!(resolve_str_tracked("dangling {{patient.name", &ctx), ("dangling {{patient.name".to_string(), true));
        assert_eq!(resolve_str_tracked("{{}}", &ctx), ("{{}}".to_string(), false));
    }

    #[test]
    fn lookup_handles_edge_cases() {
        let ctx = context();
        assert_eq!(lookup(&ctx, "patient.age"), Some(&json!(42)));
        assert_eq!(lookup(&ctx, "patient.phones.9"), None);
        assert_eq!(lookup(&ctx, "patient.phones.x"), None);
        assert_eq!(lookup(&ctx, ""), None);
    }
}
