//! `include_vars` — load variables from a YAML or JSON file (or every file
//! in a directory) into the play's variable scope. Runs entirely on the
//! controller; the loaded values are returned as facts for the executor to
//! write into [`crate::vars::VarPrecedence::IncludeVarsSetFact`].

use async_trait::async_trait;
use std::path::Path;

use crate::error::{Error, Result};
use crate::traits::{ActionContext, ActionPlugin, Return};

/// The `include_vars` action plugin.
#[derive(Debug)]
pub struct IncludeVarsAction;

impl IncludeVarsAction {
    fn load_file(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        let value: serde_json::Value = serde_yaml_to_json(&content).map_err(|e| {
            Error::invalid_args("include_vars", format!("failed to parse {}: {e}", path.display()))
        })?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            serde_json::Value::Null => Ok(serde_json::Map::new()),
            _ => Err(Error::invalid_args(
                "include_vars",
                format!("{} does not contain a mapping at the top level", path.display()),
            )),
        }
    }

    fn load_dir(dir: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut all = serde_json::Map::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map_err(Error::Io)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yml") | Some("yaml") | Some("json")
                )
            })
            .collect();
        entries.sort();
        for path in entries {
            all.extend(Self::load_file(&path)?);
        }
        Ok(all)
    }
}

fn serde_yaml_to_json(content: &str) -> std::result::Result<serde_json::Value, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    serde_json::to_value(yaml).map_err(|e| e.to_string())
}

#[async_trait]
impl ActionPlugin for IncludeVarsAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<Return> {
        let file_arg = ctx
            .templated_args
            .get("file")
            .or_else(|| ctx.templated_args.get("_raw_params"))
            .and_then(|v| v.as_str());
        let dir_arg = ctx.templated_args.get("dir").and_then(|v| v.as_str());

        let facts = match (file_arg, dir_arg) {
            (Some(file), _) => Self::load_file(Path::new(file))?,
            (None, Some(dir)) => Self::load_dir(Path::new(dir))?,
            (None, None) => {
                return Err(Error::invalid_args(
                    "include_vars",
                    "either 'file' or 'dir' must be given",
                ))
            }
        };

        let name = ctx.templated_args.get("name").and_then(|v| v.as_str());
        let mut result = Return::changed();
        if let Some(name) = name {
            result
                .ansible_facts
                .insert(name.to_string(), serde_json::Value::Object(facts));
        } else {
            result.ansible_facts = facts.into_iter().collect();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::local::LocalConnection;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn loads_a_yaml_file_into_facts() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yml").unwrap();
        writeln!(file, "foo: bar\nnum: 42").unwrap();

        let conn = LocalConnection::new();
        let mut args = std::collections::HashMap::new();
        args.insert(
            "file".to_string(),
            json!(file.path().to_str().unwrap()),
        );
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: args,
            variable_env: &env,
        };
        let result = IncludeVarsAction.run(&mut ctx).await.unwrap();
        assert_eq!(result.ansible_facts.get("foo"), Some(&json!("bar")));
        assert_eq!(result.ansible_facts.get("num"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn missing_file_and_dir_is_an_error() {
        let conn = LocalConnection::new();
        let env = json!({});
        let mut ctx = ActionContext {
            session: &conn,
            templated_args: std::collections::HashMap::new(),
            variable_env: &env,
        };
        assert!(IncludeVarsAction.run(&mut ctx).await.is_err());
    }
}
