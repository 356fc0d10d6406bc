//! Conditional and loop evaluation (spec §4.6): `when`, `changed_when`,
//! `failed_when`, `until`, and loop-item expansion (`loop`, `with_items`,
//! the generic `with_<lookup>` syntax).

use crate::error::{Error, Result};
use crate::lookup::LookupRegistry;
use crate::playbook::{Task, When};
use crate::template::{TemplateOptions, Templar};

/// Coerces a rendered condition value to a bool the way a Jinja expression
/// result is interpreted for `when`/`changed_when`/`failed_when`/`until`:
/// native booleans pass through, and the literal strings a boolean renders
/// as are recognized.
pub fn coerce_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.as_str() {
            "True" | "true" => Some(true),
            "False" | "false" => Some(false),
            _ => None,
        },
        serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

fn eval_condition(templar: &Templar, condition: &str, env: &serde_json::Value) -> Result<bool> {
    let wrapped = format!("{{{{ {condition} }}}}");
    let value = templar.template(&wrapped, env, &TemplateOptions::default())?;
    coerce_bool(&value).ok_or_else(|| Error::WhenNotBoolean(condition.to_string()))
}

/// Evaluates a task's `when` clause; an absent clause is always true.
/// Multiple conditions (the list form) are ANDed together, short-circuiting
/// on the first false.
pub fn eval_when(templar: &Templar, when: Option<&When>, env: &serde_json::Value) -> Result<bool> {
    let Some(when) = when else {
        return Ok(true);
    };
    for condition in when.conditions() {
        if !eval_condition(templar, condition, env)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluates `changed_when`, overriding the task's natural changed status
/// when the clause is present.
pub fn eval_changed_when(
    templar: &Templar,
    expr: Option<&str>,
    env: &serde_json::Value,
    natural: bool,
) -> Result<bool> {
    match expr {
        Some(expr) if !expr.is_empty() => eval_condition(templar, expr, env),
        _ => Ok(natural),
    }
}

/// Evaluates `failed_when`, overriding the task's natural failed status
/// when the clause is present.
pub fn eval_failed_when(
    templar: &Templar,
    expr: Option<&str>,
    env: &serde_json::Value,
    natural: bool,
) -> Result<bool> {
    match expr {
        Some(expr) if !expr.is_empty() => eval_condition(templar, expr, env),
        _ => Ok(natural),
    }
}

/// Evaluates a retry loop's `until` condition; true means stop retrying.
pub fn eval_until(templar: &Templar, expr: &str, env: &serde_json::Value) -> Result<bool> {
    eval_condition(templar, expr, env)
}

/// Parses a scalar token into a typed JSON value: an integer if it parses
/// as one, a string otherwise.
fn parse_scalar(raw: &str) -> serde_json::Value {
    raw.parse::<i64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Splits a rendered `with_<lookup>` argument into the positional argument
/// list the lookup registry expects: an array is passed through
/// element-wise; a `key=value key2=value2` string (the `with_sequence`
/// convention) becomes a single mapping argument with typed values; any
/// other string is passed as one positional argument.
fn lookup_args(rendered: &serde_json::Value) -> Vec<serde_json::Value> {
    match rendered {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::String(s) => {
            let tokens: Vec<&str> = s.split_whitespace().collect();
            if !tokens.is_empty() && tokens.iter().all(|t| t.contains('=')) {
                let mut map = serde_json::Map::new();
                for token in tokens {
                    if let Some((k, v)) = token.split_once('=') {
                        map.insert(k.to_string(), parse_scalar(v));
                    }
                }
                vec![serde_json::Value::Object(map)]
            } else {
                vec![serde_json::Value::String(s.clone())]
            }
        }
        other => vec![other.clone()],
    }
}

/// Expands a task's loop specification (`loop`, `with_items`, or a generic
/// `with_<lookup>`) into its item list, or `None` if the task does not
/// loop at all. `with_items` additionally flattens one level of nested
/// lists, matching the legacy Ansible behavior it's named for.
pub fn evaluate_loop_items(
    templar: &Templar,
    lookups: &LookupRegistry,
    task: &Task,
    env: &serde_json::Value,
) -> Result<Option<Vec<serde_json::Value>>> {
    if let Some(raw) = &task.with_items {
        let rendered = templar.render_value(raw, env, &TemplateOptions::default())?;
        let items = match rendered {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                serde_json::Value::Array(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        return Ok(Some(flat));
    }

    if let Some(raw) = &task.loop_ {
        let rendered = templar.render_value(raw, env, &TemplateOptions::default())?;
        return match rendered {
            serde_json::Value::Array(items) => Ok(Some(items)),
            other => Err(Error::LoopNotList(other.to_string())),
        };
    }

    if let Some((lookup_name, raw_args)) = &task.with_lookup {
        let rendered = templar.render_value(raw_args, env, &TemplateOptions::default())?;
        let args = lookup_args(&rendered);
        let result = lookups.call(lookup_name, &args, &serde_json::Map::new(), env)?;
        return match result {
            serde_json::Value::Array(items) => Ok(Some(items)),
            other => Ok(Some(vec![other])),
        };
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn templar() -> Templar {
        Templar::new(Arc::new(LookupRegistry::with_builtins()))
    }

    #[test]
    fn when_absent_is_true() {
        let t = templar();
        assert!(eval_when(&t, None, &json!({})).unwrap());
    }

    #[test]
    fn when_multiple_conditions_are_anded() {
        let t = templar();
        let when = When::Multiple(vec!["1 == 1".to_string(), "1 == 2".to_string()]);
        assert!(!eval_when(&t, Some(&when), &json!({})).unwrap());
    }

    #[test]
    fn with_items_flattens_one_level() {
        let t = templar();
        let lookups = LookupRegistry::with_builtins();
        let mut task = Task::new("t", "debug", json!({}));
        task.with_items = Some(json!([[1, 2], 3]));
        let items = evaluate_loop_items(&t, &lookups, &task, &json!({})).unwrap().unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn with_sequence_lookup_expands() {
        let t = templar();
        let lookups = LookupRegistry::with_builtins();
        let mut task = Task::new("t", "debug", json!({}));
        task.with_lookup = Some(("sequence".to_string(), json!("start=1 end=3")));
        let items = evaluate_loop_items(&t, &lookups, &task, &json!({})).unwrap().unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn no_loop_returns_none() {
        let t = templar();
        let lookups = LookupRegistry::with_builtins();
        let task = Task::new("t", "debug", json!({}));
        assert!(evaluate_loop_items(&t, &lookups, &task, &json!({})).unwrap().is_none());
    }
}
