//! Lookup plugins (C11): pure functions from an argument list (plus kwargs
//! and the active variable environment) to a JSON value, callable from a
//! template as `lookup('name', arg1, arg2, ..., kw=val)` or `query(...)`
//! (the list-forcing form). Every plugin here is a free function rather
//! than a trait object hierarchy — the teacher's plugin registry pattern,
//! simplified because none of these need per-invocation state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A lookup plugin implementation: `(positional, kwargs, variable_environment) -> value`.
pub type LookupFn = Arc<
    dyn Fn(&[serde_json::Value], &serde_json::Map<String, serde_json::Value>, &serde_json::Value) -> Result<serde_json::Value>
        + Send
        + Sync,
>;

/// Registry of lookup plugins, resolved by name at template-eval time.
pub struct LookupRegistry {
    plugins: HashMap<String, LookupFn>,
}

impl LookupRegistry {
    /// Builds a registry with the standard set of lookup plugins.
    pub fn with_builtins() -> Self {
        let mut plugins: HashMap<String, LookupFn> = HashMap::new();
        plugins.insert("list".to_string(), Arc::new(list));
        plugins.insert("items".to_string(), Arc::new(items));
        plugins.insert("indexed_items".to_string(), Arc::new(indexed_items));
        plugins.insert("sequence".to_string(), Arc::new(sequence));
        plugins.insert("random_choice".to_string(), Arc::new(random_choice));
        plugins.insert("env".to_string(), Arc::new(env));
        plugins.insert("vars".to_string(), Arc::new(vars));
        plugins.insert("varnames".to_string(), Arc::new(varnames));
        plugins.insert("url".to_string(), Arc::new(url));
        Self { plugins }
    }

    /// Calls the named lookup plugin with the given positional arguments,
    /// keyword arguments, and environment.
    pub fn call(
        &self,
        name: &str,
        args: &[serde_json::Value],
        kwargs: &serde_json::Map<String, serde_json::Value>,
        env: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| Error::UnknownLookup(name.to_string()))?;
        plugin(args, kwargs, env)
    }

    /// Registers or replaces a plugin under `name`.
    pub fn register(&mut self, name: impl Into<String>, f: LookupFn) {
        self.plugins.insert(name.into(), f);
    }
}

impl Default for LookupRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// `list`: returns the positional arguments verbatim as a list — no
/// flattening, unlike `items`.
fn list(
    args: &[serde_json::Value],
    _kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    Ok(serde_json::Value::Array(args.to_vec()))
}

/// `items`: flattens its arguments by one level into a single list
/// (Ansible's `with_items` source).
fn items(
    args: &[serde_json::Value],
    _kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut flat = Vec::new();
    for arg in args {
        match arg {
            serde_json::Value::Array(items) => flat.extend(items.clone()),
            other => flat.push(other.clone()),
        }
    }
    Ok(serde_json::Value::Array(flat))
}

/// `indexed_items`: pairs each element of the first argument's list with
/// its zero-based index, as `[index, item]`.
fn indexed_items(
    args: &[serde_json::Value],
    _kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    let items = args
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_args("indexed_items", "expected a list argument"))?;
    let indexed = items
        .iter()
        .enumerate()
        .map(|(i, v)| serde_json::json!([i, v]))
        .collect();
    Ok(serde_json::Value::Array(indexed))
}

/// Parses a base-0 integer the way Python's `int(s, 0)` would: a bare
/// decimal, or `0x`/`0o`/`0b`-prefixed hex/octal/binary, optionally signed.
fn parse_int_base0(s: &str) -> Result<i64> {
    let s = s.trim();
    let (neg, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (radix, digits) = if let Some(d) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, d)
    } else if let Some(d) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        (8, d)
    } else if let Some(d) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, d)
    } else {
        (10, rest)
    };
    let value = i64::from_str_radix(digits, radix)
        .map_err(|_| Error::invalid_args("sequence", format!("invalid integer '{s}'")))?;
    Ok(if neg { -value } else { value })
}

fn value_to_i64(v: &serde_json::Value) -> Result<i64> {
    if let Some(n) = v.as_i64() {
        return Ok(n);
    }
    if let Some(s) = v.as_str() {
        return parse_int_base0(s);
    }
    Err(Error::invalid_args("sequence", format!("expected an integer, got {v}")))
}

/// `format` must contain exactly one `%d` substitution.
fn validate_format(fmt: &str) -> Result<()> {
    if fmt.matches("%d").count() != 1 {
        return Err(Error::invalid_args("sequence", "format must contain exactly one '%d'"));
    }
    Ok(())
}

/// Builds the inclusive `start..=end` range stepped by `stride`, validating
/// the stride/direction invariants: a zero stride is always invalid; a
/// positive stride requires `end >= start`; a negative stride requires
/// `end < start`.
fn build_range_validated(start: i64, end: i64, stride: i64) -> Result<Vec<i64>> {
    if stride == 0 {
        return Err(Error::invalid_args("sequence", "stride must not be zero"));
    }
    if stride > 0 && end < start {
        return Err(Error::invalid_args("sequence", "a positive stride requires end >= start"));
    }
    if stride < 0 && end >= start {
        return Err(Error::invalid_args("sequence", "a negative stride requires end < start"));
    }

    let mut values = Vec::new();
    let mut current = start;
    if stride > 0 {
        while current <= end {
            values.push(current);
            current += stride;
        }
    } else {
        while current >= end {
            values.push(current);
            current += stride;
        }
    }
    Ok(values)
}

fn format_sequence(values: Vec<i64>, format: Option<&str>) -> Vec<serde_json::Value> {
    match format {
        Some(fmt) => values
            .into_iter()
            .map(|n| serde_json::Value::String(fmt.replacen("%d", &n.to_string(), 1)))
            .collect(),
        None => values.into_iter().map(|n| serde_json::json!(n)).collect(),
    }
}

/// Parses the shortcut string form `"[start-]end[/stride][:format]"`.
fn parse_shortcut(s: &str) -> Result<(i64, i64, i64, Option<String>)> {
    let (range_and_stride, format) = match s.split_once(':') {
        Some((r, f)) => (r, Some(f.to_string())),
        None => (s, None),
    };
    let (range_part, stride) = match range_and_stride.split_once('/') {
        Some((r, st)) => (r, parse_int_base0(st)?),
        None => (range_and_stride, 1),
    };
    let (start, end) = match range_part.split_once('-') {
        Some((s1, s2)) => (parse_int_base0(s1)?, parse_int_base0(s2)?),
        None => (1, parse_int_base0(range_part)?),
    };
    Ok((start, end, stride, format))
}

/// Parses the `key=value` object form (either a single mapping positional
/// argument or the call's kwargs): exactly one of `count`/`end` is
/// required, `start` defaults to `1`, `stride` defaults to `1`.
fn sequence_from_params(map: &serde_json::Map<String, serde_json::Value>) -> Result<Vec<serde_json::Value>> {
    let start = match map.get("start") {
        Some(v) => value_to_i64(v)?,
        None => 1,
    };
    let stride = match map.get("stride") {
        Some(v) => value_to_i64(v)?,
        None => 1,
    };
    let format = map.get("format").and_then(|v| v.as_str());
    if let Some(fmt) = format {
        validate_format(fmt)?;
    }

    match (map.get("count"), map.get("end")) {
        (Some(_), Some(_)) | (None, None) => {
            Err(Error::invalid_args("sequence", "exactly one of 'count' or 'end' is required"))
        }
        (Some(count_v), None) => {
            let count = value_to_i64(count_v)?;
            if count < 0 {
                return Err(Error::invalid_args("sequence", "count must not be negative"));
            }
            if count == 0 {
                return Ok(Vec::new());
            }
            if stride == 0 {
                return Err(Error::invalid_args("sequence", "stride must not be zero"));
            }
            let end = start + stride * (count - 1);
            let values = build_range_validated(start, end, stride)?;
            Ok(format_sequence(values, format))
        }
        (None, Some(end_v)) => {
            let end = value_to_i64(end_v)?;
            let values = build_range_validated(start, end, stride)?;
            Ok(format_sequence(values, format))
        }
    }
}

/// `sequence`: generates a numeric range from the shortcut string form
/// `"[start-]end[/stride][:format]"`, from `key=value` kwargs/a mapping
/// positional among `{start,count,end,stride,format}`, or (kept for
/// backward compatibility with plain numeric calls) bare `start end
/// [stride]` positionals.
fn sequence(
    args: &[serde_json::Value],
    kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    if !kwargs.is_empty() {
        return Ok(serde_json::Value::Array(sequence_from_params(kwargs)?));
    }

    match args.first() {
        Some(serde_json::Value::Object(map)) => Ok(serde_json::Value::Array(sequence_from_params(map)?)),
        Some(serde_json::Value::String(s)) => {
            let (start, end, stride, format) = parse_shortcut(s)?;
            if let Some(fmt) = &format {
                validate_format(fmt)?;
            }
            let values = build_range_validated(start, end, stride)?;
            Ok(serde_json::Value::Array(format_sequence(values, format.as_deref())))
        }
        _ => {
            let nums: Vec<i64> = args.iter().map(value_to_i64).collect::<Result<_>>()?;
            let (start, end, stride) = match nums.as_slice() {
                [end] => (1, *end, 1),
                [start, end] => (*start, *end, 1),
                [start, end, stride] => (*start, *end, *stride),
                _ => return Err(Error::invalid_args("sequence", "expected start/end[/stride] or a shortcut string")),
            };
            let values = build_range_validated(start, end, stride)?;
            Ok(serde_json::Value::Array(values.into_iter().map(|n| serde_json::json!(n)).collect()))
        }
    }
}

/// `random_choice`: picks one element at random from its (flattened)
/// argument list.
fn random_choice(
    args: &[serde_json::Value],
    _kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    use rand::seq::SliceRandom;

    let items = match args.first() {
        Some(serde_json::Value::Array(items)) => items.clone(),
        _ => args.to_vec(),
    };
    if items.is_empty() {
        return Err(Error::invalid_args("random_choice", "no choices given"));
    }
    Ok(items
        .choose(&mut rand::thread_rng())
        .cloned()
        .expect("checked non-empty above"))
}

/// `env`: reads a process environment variable, returning an empty string
/// (matching Ansible's behavior) when it is unset.
fn env(
    args: &[serde_json::Value],
    _kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    let name = args
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_args("env", "expected a variable name"))?;
    let first_token = name.split_whitespace().next().unwrap_or(name);
    Ok(serde_json::Value::String(
        std::env::var(first_token).unwrap_or_default(),
    ))
}

/// `vars`: resolves one or more variable names against the active
/// environment, falling back to `kwargs["default"]` when a name is
/// undefined and erroring when no default was given.
fn vars(
    args: &[serde_json::Value],
    kwargs: &serde_json::Map<String, serde_json::Value>,
    env_ctx: &serde_json::Value,
) -> Result<serde_json::Value> {
    let names: Vec<&str> = args.iter().filter_map(|v| v.as_str()).collect();
    if names.is_empty() {
        return Err(Error::invalid_args("vars", "expected at least one variable name"));
    }
    let mut resolved: Vec<serde_json::Value> = Vec::with_capacity(names.len());
    for name in &names {
        match env_ctx.get(name) {
            Some(v) => resolved.push(v.clone()),
            None => match kwargs.get("default") {
                Some(default) => resolved.push(default.clone()),
                None => {
                    return Err(Error::invalid_args(
                        "vars",
                        format!("'{name}' is undefined and no default was given"),
                    ))
                }
            },
        }
    }
    if resolved.len() == 1 {
        Ok(resolved.remove(0))
    } else {
        Ok(serde_json::Value::Array(resolved))
    }
}

/// `varnames`: returns all variable names in the environment matching any
/// of the given regex patterns.
fn varnames(
    args: &[serde_json::Value],
    _kwargs: &serde_json::Map<String, serde_json::Value>,
    env_ctx: &serde_json::Value,
) -> Result<serde_json::Value> {
    let patterns: Vec<regex::Regex> = args
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|p| regex::Regex::new(p).ok())
        .collect();
    let serde_json::Value::Object(map) = env_ctx else {
        return Ok(serde_json::Value::Array(Vec::new()));
    };
    let matches: Vec<serde_json::Value> = map
        .keys()
        .filter(|name| patterns.is_empty() || patterns.iter().any(|re| re.is_match(name)))
        .map(|name| serde_json::Value::String(name.clone()))
        .collect();
    Ok(serde_json::Value::Array(matches))
}

/// `url`: fetches content from an HTTP(S) URL, returning the response body
/// as a string (or split into lines when `split_lines=true`). Honors the
/// subset of Ansible's `url` lookup kwargs that map onto a `reqwest`
/// client: `validate_certs`, `timeout`, `username`/`password`,
/// `http_agent`, `headers`.
fn url(
    args: &[serde_json::Value],
    kwargs: &serde_json::Map<String, serde_json::Value>,
    _env: &serde_json::Value,
) -> Result<serde_json::Value> {
    let target = args
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_args("url", "expected a URL argument"))?;

    let validate_certs = kwargs.get("validate_certs").and_then(|v| v.as_bool()).unwrap_or(true);
    let timeout_secs = kwargs.get("timeout").and_then(|v| v.as_u64()).unwrap_or(10);

    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(!validate_certs)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::invalid_args("url", format!("failed to build HTTP client: {e}")))?;

    let mut request = client.get(target);

    if let (Some(user), Some(pass)) = (
        kwargs.get("username").and_then(|v| v.as_str()),
        kwargs.get("password").and_then(|v| v.as_str()),
    ) {
        request = request.basic_auth(user, Some(pass));
    }

    if let Some(agent) = kwargs.get("http_agent").and_then(|v| v.as_str()) {
        request = request.header(reqwest::header::USER_AGENT, agent);
    }

    if let Some(serde_json::Value::Object(headers)) = kwargs.get("headers") {
        for (key, value) in headers {
            if let Some(value_str) = value.as_str() {
                request = request.header(key.as_str(), value_str);
            }
        }
    }

    let body = request
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.text())
        .map_err(|e| Error::invalid_args("url", format!("request to '{target}' failed: {e}")))?;

    if kwargs.get("split_lines").and_then(|v| v.as_bool()).unwrap_or(false) {
        let lines = body.lines().map(|l| serde_json::Value::String(l.to_string())).collect();
        Ok(serde_json::Value::Array(lines))
    } else {
        Ok(serde_json::Value::String(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_kwargs() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    #[test]
    fn list_does_not_flatten() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("list", &[json!([1, 2]), json!(3)], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!([[1, 2], 3]));
    }

    #[test]
    fn items_flattens_one_level() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("items", &[json!([1, 2]), json!(3)], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[test]
    fn indexed_items_pairs_with_index() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("indexed_items", &[json!(["a", "b"])], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!([[0, "a"], [1, "b"]]));
    }

    #[test]
    fn sequence_generates_ascending_range() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("sequence", &[json!(1), json!(5)], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!([1, 2, 3, 4, 5]));
    }

    #[test]
    fn sequence_respects_stride() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("sequence", &[json!(0), json!(10), json!(5)], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!([0, 5, 10]));
    }

    #[test]
    fn sequence_parses_shortcut_string() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("sequence", &[json!("1-10/2")], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!([1, 3, 5, 7, 9]));
    }

    #[test]
    fn sequence_applies_format() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("sequence", &[json!("1-3:web%d")], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!(["web1", "web2", "web3"]));
    }

    #[test]
    fn sequence_count_key_generates_n_values() {
        let registry = LookupRegistry::with_builtins();
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("start".to_string(), json!(5));
        kwargs.insert("count".to_string(), json!(3));
        let result = registry.call("sequence", &[], &kwargs, &json!({})).unwrap();
        assert_eq!(result, json!([5, 6, 7]));
    }

    #[test]
    fn sequence_rejects_both_count_and_end() {
        let registry = LookupRegistry::with_builtins();
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("count".to_string(), json!(3));
        kwargs.insert("end".to_string(), json!(3));
        assert!(registry.call("sequence", &[], &kwargs, &json!({})).is_err());
    }

    #[test]
    fn sequence_rejects_negative_stride_with_end_not_before_start() {
        let registry = LookupRegistry::with_builtins();
        assert!(registry
            .call("sequence", &[json!(1), json!(5), json!(-1)], &no_kwargs(), &json!({}))
            .is_err());
    }

    #[test]
    fn vars_resolves_a_single_name() {
        let registry = LookupRegistry::with_builtins();
        let env = json!({"x": 42});
        let result = registry.call("vars", &[json!("x")], &no_kwargs(), &env).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn vars_falls_back_to_default_kwarg() {
        let registry = LookupRegistry::with_builtins();
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("default".to_string(), json!("fallback"));
        let result = registry
            .call("vars", &[json!("missing")], &kwargs, &json!({}))
            .unwrap();
        assert_eq!(result, json!("fallback"));
    }

    #[test]
    fn vars_errors_when_undefined_and_no_default() {
        let registry = LookupRegistry::with_builtins();
        assert!(registry.call("vars", &[json!("missing")], &no_kwargs(), &json!({})).is_err());
    }

    #[test]
    fn varnames_filters_by_pattern() {
        let registry = LookupRegistry::with_builtins();
        let env = json!({"ansible_host": "a", "ansible_port": 22, "other": 1});
        let result = registry
            .call("varnames", &[json!("^ansible_")], &no_kwargs(), &env)
            .unwrap();
        let mut names: Vec<String> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["ansible_host", "ansible_port"]);
    }

    #[test]
    fn env_lookup_returns_empty_string_when_unset() {
        let registry = LookupRegistry::with_builtins();
        let result = registry
            .call("env", &[json!("RUSTIBLE_DEFINITELY_UNSET_VAR")], &no_kwargs(), &json!({}))
            .unwrap();
        assert_eq!(result, json!(""));
    }

    #[test]
    fn unknown_lookup_errors() {
        let registry = LookupRegistry::with_builtins();
        assert!(registry.call("nope", &[], &no_kwargs(), &json!({})).is_err());
    }
}
