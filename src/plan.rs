//! Turns raw planner output into an [`ActionPlan`].

use serde_json::Value;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::types::{ActionKind, ActionPlan, ActionStep, Coordinates};

/// Parse and shape-check planner output.
///
/// Accepts `{"actions": [...]}` or a bare array, optionally wrapped in a
/// markdown code fence. The array must be non-empty; click and fill steps need
/// numeric coordinates and navigate steps need a URL in `data`. Unrecognized
/// action names are kept and left to the executor.
pub fn validate(raw: &str) -> Result<ActionPlan> {
    let cleaned = strip_fences(raw);
    debug!(len = cleaned.len(), "Validating action plan");

    let parsed: Value = serde_json::from_str(cleaned)
        .map_err(|e| AgentError::MalformedPlan(format!("not valid JSON: {}", e)))?;

    let actions = match parsed {
        Value::Object(mut map) if map.contains_key("actions") => map.remove("actions").unwrap_or(Value::Null),
        other => other,
    };

    let Value::Array(items) = actions else {
        return Err(AgentError::MalformedPlan("actions must be an array".into()));
    };
    if items.is_empty() {
        return Err(AgentError::MalformedPlan("plan has no actions".into()));
    }

    let steps = items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_step(i + 1, item))
        .collect::<Result<Vec<_>>>()?;

    Ok(ActionPlan { steps })
}

/// Remove a surrounding ```json fence if the model added one.
fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn parse_step(position: usize, item: &Value) -> Result<ActionStep> {
    let Value::Object(map) = item else {
        return Err(AgentError::MalformedPlan(format!("action {} is not an object", position)));
    };

    let action = map
        .get("action")
        .and_then(Value::as_str)
        .map(|a| ActionKind::from(a.to_string()))
        .ok_or_else(|| AgentError::MalformedPlan(format!("action {} has no 'action' name", position)))?;

    let coordinates = map.get("coordinates").and_then(parse_coordinates);
    let data = match map.get("data") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    match action {
        ActionKind::Click | ActionKind::Fill if coordinates.is_none() => {
            return Err(AgentError::MalformedPlan(format!(
                "{} action {} needs numeric coordinates",
                action, position
            )));
        }
        ActionKind::Navigate if data.trim().is_empty() => {
            return Err(AgentError::MalformedPlan(format!(
                "navigate action {} needs a URL in 'data'",
                position
            )));
        }
        _ => {}
    }

    Ok(ActionStep {
        step: map.get("step").and_then(Value::as_u64).and_then(|s| u32::try_from(s).ok()),
        action,
        coordinates,
        data,
        description: map
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_coordinates(value: &Value) -> Option<Coordinates> {
    let x = value.get("x")?.as_f64()?;
    let y = value.get("y")?.as_f64()?;
    Some(Coordinates::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_object() {
        let plan = validate(
            r#"{"actions":[{"step":1,"action":"click","coordinates":{"x":10,"y":20}},{"step":2,"action":"fill","coordinates":{"x":30,"y":40},"data":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].action, ActionKind::Click);
        assert_eq!(plan.steps[0].coordinates, Some(Coordinates::new(10.0, 20.0)));
        assert_eq!(plan.steps[1].action, ActionKind::Fill);
        assert_eq!(plan.steps[1].data, "hello");
        assert_eq!(plan.steps[1].step, Some(2));
    }

    #[test]
    fn test_bare_array() {
        let plan = validate(r#"[{"action":"navigate","data":"https://example.com"}]"#).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].action, ActionKind::Navigate);
        assert_eq!(plan.steps[0].step, None);
        assert!(plan.steps[0].coordinates.is_none());
    }

    #[test]
    fn test_fenced_output() {
        let raw = "```json\n{\"actions\":[{\"action\":\"click\",\"coordinates\":{\"x\":1.5,\"y\":2}}]}\n```";
        let plan = validate(raw).unwrap();
        assert_eq!(plan.steps[0].coordinates, Some(Coordinates::new(1.5, 2.0)));
    }

    #[test]
    fn test_invalid_json() {
        let err = validate("{not valid json").unwrap_err();
        assert!(matches!(err, AgentError::MalformedPlan(_)));
    }

    #[test]
    fn test_rejects_non_array_shapes() {
        for raw in [
            r#"{"steps":[]}"#,
            r#"{"actions":{"action":"click"}}"#,
            r#""click""#,
            "42",
            "null",
            r#"{"actions":null}"#,
        ] {
            let err = validate(raw).unwrap_err();
            assert!(matches!(err, AgentError::MalformedPlan(_)), "accepted {raw}");
        }
    }

    #[test]
    fn test_rejects_empty_plan() {
        assert!(matches!(validate("[]"), Err(AgentError::MalformedPlan(_))));
        assert!(matches!(validate(r#"{"actions":[]}"#), Err(AgentError::MalformedPlan(_))));
    }

    #[test]
    fn test_click_needs_numeric_coordinates() {
        let err = validate(r#"[{"action":"click","coordinates":{"x":"10","y":20}}]"#).unwrap_err();
        assert!(err.to_string().contains("coordinates"));
        assert!(validate(r#"[{"action":"fill","data":"x"}]"#).is_err());
    }

    #[test]
    fn test_navigate_needs_url() {
        assert!(validate(r#"[{"action":"navigate"}]"#).is_err());
        assert!(validate(r#"[{"action":"navigate","data":"  "}]"#).is_err());
    }

    #[test]
    fn test_step_without_action_name() {
        assert!(validate(r#"[{"coordinates":{"x":1,"y":1}}]"#).is_err());
        assert!(validate(r#"["click"]"#).is_err());
    }

    #[test]
    fn test_unknown_action_is_kept() {
        let plan = validate(r#"[{"action":"hover","coordinates":{"x":1,"y":1}}]"#).unwrap();
        assert_eq!(plan.steps[0].action, ActionKind::Unknown("hover".into()));
    }

    #[test]
    fn test_non_string_data_is_stringified() {
        let plan = validate(r#"[{"action":"fill","coordinates":{"x":1,"y":1},"data":12345}]"#).unwrap();
        assert_eq!(plan.steps[0].data, "12345");
    }

    #[test]
    fn test_oversized_step_number_is_dropped() {
        let plan = validate(
            r#"[{"step":4294967296,"action":"click","coordinates":{"x":1,"y":1}},
                {"step":7,"action":"click","coordinates":{"x":2,"y":2}}]"#,
        )
        .unwrap();
        assert_eq!(plan.steps[0].step, None);
        assert_eq!(plan.steps[1].step, Some(7));
    }
}
