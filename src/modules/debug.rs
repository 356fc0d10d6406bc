//! `debug` — print a message or a variable's value. Runs entirely on the
//! controller; never touches the managed host.

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::{ActionContext, ActionPlugin, Return};

/// The `debug` action plugin.
#[derive(Debug)]
pub struct DebugAction;

#[async_trait]
impl ActionPlugin for DebugAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<Return> {
        let msg = if let Some(var) = ctx.templated_args.get("var").and_then(|v| v.as_str()) {
            let value = ctx
                .variable_env
                .get(var)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            format!("{var} = {}", format_value(&value))
        } else if let Some(msg) = ctx.templated_args.get("msg").and_then(|v| v.as_str()) {
            msg.to_string()
        } else {
            "Hello world!".to_string()
        };

        let mut result = Return::ok();
        result.msg = Some(msg);
        Ok(result)
    }
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "VARIABLE IS NOT DEFINED!".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::local::LocalConnection;
    use serde_json::json;

    #[tokio::test]
    async fn prints_literal_msg() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("msg".to_string(), json!("hello"));
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = DebugAction.run(&mut ctx).await.unwrap();
        assert_eq!(result.msg.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn prints_resolved_var() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("var".to_string(), json!("x"));
        let env = json!({"x": 42});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = DebugAction.run(&mut ctx).await.unwrap();
        assert_eq!(result.msg.as_deref(), Some("x = 42"));
    }
}
