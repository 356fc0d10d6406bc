//! `set_fact` — set host variables during playbook execution. Runs entirely
//! on the controller; the resulting facts are written into the variable
//! manager's [`crate::vars::VarPrecedence::IncludeVarsSetFact`] layer by the
//! executor once this plugin returns.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::traits::{ActionContext, ActionPlugin, Return};

/// The `set_fact` action plugin.
#[derive(Debug)]
pub struct SetFactAction;

#[async_trait]
impl ActionPlugin for SetFactAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<Return> {
        let facts: std::collections::HashMap<String, serde_json::Value> = ctx
            .templated_args
            .iter()
            .filter(|(k, _)| k.as_str() != "cacheable")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if facts.is_empty() {
            return Err(Error::invalid_args(
                "set_fact",
                "at least one key=value pair is required",
            ));
        }

        let mut result = Return::changed();
        result.ansible_facts = facts;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::local::LocalConnection;
    use serde_json::json;

    #[tokio::test]
    async fn sets_requested_facts() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("foo".to_string(), json!("bar"));
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = SetFactAction.run(&mut ctx).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.ansible_facts.get("foo"), Some(&json!("bar")));
    }

    #[tokio::test]
    async fn cacheable_key_is_not_itself_a_fact() {
        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert("foo".to_string(), json!("bar"));
        args.insert("cacheable".to_string(), json!(true));
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = SetFactAction.run(&mut ctx).await.unwrap();
        assert!(!result.ansible_facts.contains_key("cacheable"));
    }

    #[tokio::test]
    async fn empty_facts_is_an_error() {
        let conn = LocalConnection::new();
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: std::collections::HashMap::new(),
            variable_env: &env,
        };
        assert!(SetFactAction.run(&mut ctx).await.is_err());
    }
}
