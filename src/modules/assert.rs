//! `assert` — fail the task unless every condition in `that` evaluates
//! truthy. Runs entirely on the controller.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::lookup::LookupRegistry;
use crate::template::{TemplateOptions, Templar};
use crate::traits::{ActionContext, ActionPlugin, Return};

/// The `assert` action plugin.
#[derive(Debug)]
pub struct AssertAction;

impl AssertAction {
    fn conditions(ctx: &ActionContext<'_>) -> Vec<String> {
        match ctx.templated_args.get("that") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    fn evaluate(condition: &str, env: &serde_json::Value) -> Result<bool> {
        let templar = Templar::new(Arc::new(LookupRegistry::with_builtins()));
        let wrapped = format!("{{{{ {condition} }}}}");
        let rendered = templar.render_str(&wrapped, env, &TemplateOptions::default())?;
        let trimmed = rendered.trim();
        Ok(!matches!(
            trimmed,
            "" | "false" | "False" | "0" | "none" | "None"
        ))
    }
}

#[async_trait]
impl ActionPlugin for AssertAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<Return> {
        let conditions = Self::conditions(ctx);
        if conditions.is_empty() {
            return Ok(Return::failed("'that' requires at least one condition"));
        }

        let mut failed = Vec::new();
        for condition in &conditions {
            match Self::evaluate(condition, ctx.variable_env) {
                Ok(true) => {}
                Ok(false) => failed.push(condition.clone()),
                Err(e) => failed.push(format!("{condition} (evaluation error: {e})")),
            }
        }

        if failed.is_empty() {
            let msg = ctx
                .templated_args
                .get("success_msg")
                .and_then(|v| v.as_str())
                .unwrap_or("All assertions passed")
                .to_string();
            let mut result = Return::ok();
            result.msg = Some(msg);
            Ok(result)
        } else {
            let msg = ctx
                .templated_args
                .get("fail_msg")
                .or_else(|| ctx.templated_args.get("msg"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Assertion failed: {}", failed.join(", ")));
            let mut result = Return::failed(msg);
            result
                .extra
                .insert("failed_when_result".to_string(), serde_json::json!(failed));
            Ok(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::local::LocalConnection;
    use serde_json::json;

    #[tokio::test]
    async fn all_true_conditions_pass() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("that".to_string(), json!(["1 == 1", "2 > 1"]));
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = AssertAction.run(&mut ctx).await.unwrap();
        assert!(!result.failed);
    }

    #[tokio::test]
    async fn a_false_condition_fails_the_task() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("that".to_string(), json!(["1 == 2"]));
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = AssertAction.run(&mut ctx).await.unwrap();
        assert!(result.failed);
    }

    #[tokio::test]
    async fn conditions_see_the_variable_environment() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("that".to_string(), json!(["x == 5"]));
        let env = json!({"x": 5});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = AssertAction.run(&mut ctx).await.unwrap();
        assert!(!result.failed);
    }
}
