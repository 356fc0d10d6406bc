//! Template rendering (C3): a thin wrapper around `minijinja` that
//! implements the single-variable type-preserving evaluation Ansible users
//! rely on — `{{ some_list }}` yields the list itself, not its string
//! representation — plus `lookup()`/`query()` dispatch into the lookup
//! plugin registry and a compiled-template cache keyed by template content
//! and the active option set.
//!
//! Grounded on the teacher's `cache::template` module for the
//! compile-once/render-many shape, trimmed of its LRU/memory-pressure
//! machinery: task argument templates are short-lived and evicted with the
//! play, so a straightforward unbounded cache is all this needs.

use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::lookup::LookupRegistry;

/// Options controlling how a single template is evaluated, mirroring the
/// knobs Ansible's templar exposes per-call.
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Treat bare (non-`{{ }}`) strings that look like expressions as
    /// templates anyway (used for `when`/`that` conditionals).
    pub convert_bare: bool,
    /// Cache the compiled template keyed on source + these options.
    pub cache: bool,
    /// Preserve a single trailing newline instead of minijinja's default
    /// trim behavior.
    pub preserve_trailing_newlines: bool,
    /// Escape backslashes before rendering (legacy Jinja2 compatibility
    /// for paths on Windows-authored content).
    pub escape_back_slashes: bool,
    /// Raise an error instead of rendering `Undefined` as empty.
    pub fail_on_undefined: bool,
    /// Attempt to parse the rendered string back into a typed JSON value.
    pub convert_data: bool,
    /// Disable `lookup()`/`query()` dispatch for this render (used when
    /// templating data that must not execute plugins, e.g. vault content).
    pub disable_lookups: bool,
    /// Additional variables layered over the environment for this render
    /// only, without touching the variable manager.
    pub overrides: HashMap<String, serde_json::Value>,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            convert_bare: false,
            cache: true,
            preserve_trailing_newlines: true,
            escape_back_slashes: false,
            fail_on_undefined: true,
            convert_data: true,
            disable_lookups: false,
            overrides: HashMap::new(),
        }
    }
}

/// True if `s` contains any Jinja delimiter and is therefore a candidate
/// for templating at all — the fast-path check run before the more
/// expensive `is_template` parse.
pub fn is_possibly_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

/// True if `s` parses as a template with at least one expression or
/// statement block (as opposed to being literal text that merely contains
/// a stray brace).
pub fn is_template(s: &str) -> bool {
    if !is_possibly_template(s) {
        return false;
    }
    let env = minijinja::Environment::new();
    env.template_from_str(s).is_ok()
}

/// Cache key per step 5 of the single-variable evaluation algorithm:
/// `sha1(template || serialized_options)`. Only single-variable patterns
/// are cached — the caller is responsible for only consulting the cache
/// on that path.
struct CacheKey(String);

impl CacheKey {
    fn new(template: &str, options: &TemplateOptions) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(template.as_bytes());
        hasher.update(options.convert_bare.to_string().as_bytes());
        hasher.update(options.fail_on_undefined.to_string().as_bytes());
        hasher.update(options.convert_data.to_string().as_bytes());
        hasher.update(options.disable_lookups.to_string().as_bytes());
        let mut override_keys: Vec<&String> = options.overrides.keys().collect();
        override_keys.sort();
        for key in override_keys {
            hasher.update(key.as_bytes());
            if let Some(value) = options.overrides.get(key) {
                hasher.update(value.to_string().as_bytes());
            }
        }
        Self(format!("{:x}", hasher.finalize()))
    }
}

/// The template engine: a minijinja environment plus a compiled-template
/// cache, with `lookup`/`query` wired to the lookup plugin registry.
pub struct Templar {
    env: minijinja::Environment<'static>,
    cache: RwLock<HashMap<String, serde_json::Value>>,
    lookups: Arc<LookupRegistry>,
}

impl std::fmt::Debug for Templar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Templar").finish()
    }
}

impl Templar {
    /// Builds a templar backed by the given lookup registry.
    pub fn new(lookups: Arc<LookupRegistry>) -> Self {
        let mut env = minijinja::Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        Self {
            env,
            cache: RwLock::new(HashMap::new()),
            lookups,
        }
    }

    /// Evaluates `template_str` against `context`, preserving the type of
    /// the rendered value when the whole string is a single `{{ expr }}`
    /// (steps 1-5 of the single-variable evaluation algorithm): a template
    /// consisting of exactly one expression with nothing else around it
    /// returns that expression's native value rather than its string form.
    pub fn template(
        &self,
        template_str: &str,
        context: &serde_json::Value,
        options: &TemplateOptions,
    ) -> Result<serde_json::Value> {
        if !is_possibly_template(template_str) {
            return Ok(serde_json::Value::String(template_str.to_string()));
        }

        if let Some(single_expr) = as_single_expression(template_str) {
            let cache_key = options.cache.then(|| CacheKey::new(template_str, options));
            if let Some(key) = &cache_key {
                if let Some(cached) = self.cache.read().get(&key.0).cloned() {
                    return Ok(cached);
                }
            }
            if let Ok(value) = self.eval_expression(single_expr, context, options) {
                if let Some(key) = cache_key {
                    self.cache.write().insert(key.0, value.clone());
                }
                return Ok(value);
            }
        }

        let rendered = self.render_str(template_str, context, options)?;
        if options.convert_data {
            if let Ok(value) = serde_json::from_str(&rendered) {
                return Ok(value);
            }
        }
        Ok(serde_json::Value::String(rendered))
    }

    /// Renders `template_str` to a string, always.
    pub fn render_str(
        &self,
        template_str: &str,
        context: &serde_json::Value,
        options: &TemplateOptions,
    ) -> Result<String> {
        let source = if options.escape_back_slashes {
            template_str.replace('\\', "\\\\")
        } else {
            template_str.to_string()
        };

        let ctx = self.build_context(context, options);
        // Only the single-variable evaluation path caches its outcome (see
        // `template`, step 5 of the single-variable evaluation algorithm);
        // a general multi-expression render has no stable cache key that
        // covers both the compiled template and every interpolated value,
        // so it is always re-rendered.
        let rendered = self.render_with_lookups(&source, &ctx, options)?;

        if options.preserve_trailing_newlines && template_str.ends_with('\n') && !rendered.ends_with('\n') {
            Ok(format!("{rendered}\n"))
        } else {
            Ok(rendered)
        }
    }

    fn eval_expression(
        &self,
        expr: &str,
        context: &serde_json::Value,
        options: &TemplateOptions,
    ) -> Result<serde_json::Value> {
        let ctx = self.build_context(context, options);
        let mut env = self.env.clone();
        if !options.disable_lookups {
            register_lookup_functions(&mut env, Arc::clone(&self.lookups), ctx.clone());
        }

        let compiled = env
            .compile_expression(expr)
            .map_err(|e| Error::template_render(expr, e.to_string()))?;
        let minijinja_value = compiled
            .eval(minijinja::Value::from_serialize(&ctx))
            .map_err(|e| Error::template_render(expr, e.to_string()))?;
        serde_json::to_value(minijinja_value).map_err(|e| Error::template_render(expr, e.to_string()))
    }

    fn render_with_lookups(
        &self,
        source: &str,
        ctx: &serde_json::Value,
        options: &TemplateOptions,
    ) -> Result<String> {
        let mut env = self.env.clone();
        if !options.disable_lookups {
            register_lookup_functions(&mut env, Arc::clone(&self.lookups), ctx.clone());
        }
        let tmpl = env
            .template_from_str(source)
            .map_err(|e| Error::TemplateSyntax {
                template: source.to_string(),
                message: e.to_string(),
            })?;
        tmpl.render(minijinja::Value::from_serialize(ctx))
            .map_err(|e| Error::template_render(source, e.to_string()))
    }

    /// Recursively templates every string leaf of `value` against `context`,
    /// preserving structure: mapping keys are never templated, only values;
    /// a string leaf uses the single-variable type-preserving evaluation in
    /// [`Self::template`], so `{{ a_list }}` inside a mapping value still
    /// yields a native list rather than its string form.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &serde_json::Value,
        options: &TemplateOptions,
    ) -> Result<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => self.template(s, context, options),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, context, options))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, context, options)?);
                }
                Ok(serde_json::Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn build_context(
        &self,
        context: &serde_json::Value,
        options: &TemplateOptions,
    ) -> serde_json::Value {
        if options.overrides.is_empty() {
            return context.clone();
        }
        let mut merged = context.clone();
        if let serde_json::Value::Object(map) = &mut merged {
            for (k, v) in &options.overrides {
                map.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// Registers `lookup` (comma-joins non-list output) and `query` (forces
/// list output, i.e. `wantlist=true`) as distinct callables against `env`,
/// both backed by `lookups` and closed over `ctx` as the variable
/// environment they resolve names in.
fn register_lookup_functions(env: &mut minijinja::Environment<'static>, lookups: Arc<LookupRegistry>, ctx: serde_json::Value) {
    let lookups_for_lookup = Arc::clone(&lookups);
    let ctx_for_lookup = ctx.clone();
    env.add_function(
        "lookup",
        move |name: String, args: minijinja::value::Rest<minijinja::Value>, kwargs: minijinja::value::Kwargs| {
            call_lookup(&lookups_for_lookup, &name, &args, &kwargs, &ctx_for_lookup, false)
        },
    );
    env.add_function(
        "query",
        move |name: String, args: minijinja::value::Rest<minijinja::Value>, kwargs: minijinja::value::Kwargs| {
            call_lookup(&lookups, &name, &args, &kwargs, &ctx, true)
        },
    );
}

fn kwargs_to_json(kwargs: &minijinja::value::Kwargs) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for key in kwargs.args() {
        if let Ok(value) = kwargs.get::<minijinja::Value>(key) {
            map.insert(key.to_string(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null));
        }
    }
    map
}

/// `query` forces list output; plain `lookup` comma-joins non-list output
/// into a single string (both per spec §4.2's embedded lookup dispatch).
fn finalize_lookup_result(result: serde_json::Value, wantlist: bool) -> serde_json::Value {
    match (wantlist, result) {
        (true, serde_json::Value::Array(items)) => serde_json::Value::Array(items),
        (true, other) => serde_json::Value::Array(vec![other]),
        (false, serde_json::Value::Array(items)) => {
            let joined = items.iter().map(scalar_to_display).collect::<Vec<_>>().join(",");
            serde_json::Value::String(joined)
        }
        (false, other) => other,
    }
}

fn scalar_to_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn call_lookup(
    lookups: &LookupRegistry,
    name: &str,
    args: &[minijinja::Value],
    kwargs: &minijinja::value::Kwargs,
    ctx: &serde_json::Value,
    wantlist: bool,
) -> std::result::Result<minijinja::Value, minijinja::Error> {
    let json_args: Vec<serde_json::Value> = args
        .iter()
        .map(|a| serde_json::to_value(a).unwrap_or(serde_json::Value::Null))
        .collect();
    let json_kwargs = kwargs_to_json(kwargs);
    let result = lookups.call(name, &json_args, &json_kwargs, ctx).map_err(|e| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
    })?;
    Ok(minijinja::Value::from_serialize(&finalize_lookup_result(result, wantlist)))
}

/// Returns the inner expression if `s` is exactly one `{{ ... }}` block
/// with no other text around it (ignoring surrounding whitespace).
fn as_single_expression(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn templar() -> Templar {
        Templar::new(Arc::new(LookupRegistry::with_builtins()))
    }

    #[test]
    fn plain_string_passes_through() {
        let t = templar();
        let ctx = json!({});
        let result = t.template("hello", &ctx, &TemplateOptions::default()).unwrap();
        assert_eq!(result, json!("hello"));
    }

    #[test]
    fn single_expression_preserves_type() {
        let t = templar();
        let ctx = json!({"items": [1, 2, 3]});
        let result = t
            .template("{{ items }}", &ctx, &TemplateOptions::default())
            .unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[test]
    fn mixed_template_renders_to_string() {
        let t = templar();
        let ctx = json!({"name": "world"});
        let result = t
            .template("hello {{ name }}", &ctx, &TemplateOptions::default())
            .unwrap();
        assert_eq!(result, json!("hello world"));
    }

    #[test]
    fn is_template_detects_expressions() {
        assert!(is_template("{{ x }}"));
        assert!(!is_template("plain text"));
    }
}
