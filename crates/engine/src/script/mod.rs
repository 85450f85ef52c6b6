//! Embedded script interpreter: variable table, expression evaluation,
//! condition checks, and `${...}` / `$NAME` interpolation.
//!
//! One [`ScriptEngine`] is owned by exactly one flow execution; it is not
//! safe to share across flows. The variable table is the single
//! authoritative store: the evaluator reads it directly, so there is no
//! second copy to fall out of sync.

pub mod expr;

use std::env;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tapflow_types::{FlowConfig, Platform, RunnerError};
use tracing::debug;

pub use expr::{ScriptValue, ENV_VAR_PATTERN};

use expr::{parse_expression, parse_statements, Scope, Statement};

/// Saved variable values returned by [`ScriptEngine::with_env_vars`].
///
/// Callers hand it back to [`ScriptEngine::restore_env`] on every exit path
/// of the scope it opened.
#[must_use = "scoped variables leak unless restored via restore_env"]
#[derive(Debug)]
pub struct SavedEnv(Vec<(String, Option<String>)>);

/// Expression-and-statement evaluator with a process-level variable table.
#[derive(Debug, Default)]
pub struct ScriptEngine {
    vars: IndexMap<String, String>,
    output: IndexMap<String, ScriptValue>,
    copied_text: Option<String>,
    flow_dir: Option<PathBuf>,
    platform: Option<Platform>,
}

impl ScriptEngine {
    /// Engine seeded for one flow: process environment (names matching the
    /// env-var pattern only), a synthetic `APP_ID`, then the flow's own env
    /// map, later sources winning.
    pub fn for_flow(config: &FlowConfig, platform: Option<Platform>) -> Self {
        let mut engine = ScriptEngine {
            platform,
            ..Default::default()
        };

        for (name, value) in env::vars() {
            if ENV_VAR_PATTERN.is_match(&name) {
                engine.vars.insert(name, value);
            }
        }
        if let Some(app_id) = &config.app_id {
            engine.vars.insert("APP_ID".to_string(), app_id.clone());
        }
        for (name, value) in &config.env {
            engine.vars.insert(name.clone(), value.clone());
        }
        if let Some(source) = &config.source_path {
            engine.flow_dir = source.parent().map(Path::to_path_buf);
        }

        engine
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Applies a `defineVariables` step: values are expanded before storing.
    pub fn define_variables(&mut self, variables: &IndexMap<String, String>) {
        for (name, value) in variables {
            let expanded = self.expand(value);
            self.vars.insert(name.clone(), expanded);
        }
    }

    /// Installs a scoped mapping and returns the prior values for restore.
    pub fn with_env_vars(&mut self, scoped: &IndexMap<String, String>) -> SavedEnv {
        let mut saved = Vec::with_capacity(scoped.len());
        for (name, value) in scoped {
            saved.push((name.clone(), self.vars.get(name).cloned()));
            let expanded = self.expand(value);
            self.vars.insert(name.clone(), expanded);
        }
        SavedEnv(saved)
    }

    /// Restores values captured by [`Self::with_env_vars`].
    pub fn restore_env(&mut self, saved: SavedEnv) {
        for (name, previous) in saved.0.into_iter().rev() {
            match previous {
                Some(value) => {
                    self.vars.insert(name, value);
                }
                None => {
                    self.vars.shift_remove(&name);
                }
            }
        }
    }

    /// Two-pass variable expansion.
    ///
    /// Pass 1 evaluates `${expression}` spans against the current bindings;
    /// a span that fails to evaluate is left as-is. Pass 2 replaces literal
    /// `$NAME` occurrences for every known variable, longest names first so
    /// `$USERNAME` is not misread as `$USER` followed by `NAME`, and only
    /// where the next character cannot continue an identifier.
    pub fn expand(&self, text: &str) -> String {
        let expanded = self.expand_expressions(text);
        self.substitute_plain(&expanded)
    }

    fn expand_expressions(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };
            let expression = &after[..end];
            match self.eval_expression(expression) {
                Ok(value) => result.push_str(&value.to_display_string()),
                Err(error) => {
                    debug!(expression = %expression, error = %error, "leaving unresolvable expression span unexpanded");
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }
        result.push_str(rest);
        result
    }

    fn substitute_plain(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        let mut names: Vec<&String> = self.vars.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut result = text.to_string();
        for name in names {
            let needle = format!("${name}");
            if !result.contains(&needle) {
                continue;
            }
            let value = self.vars.get(name.as_str()).cloned().unwrap_or_default();
            let mut replaced = String::with_capacity(result.len());
            let mut rest = result.as_str();
            while let Some(position) = rest.find(&needle) {
                let after = &rest[position + needle.len()..];
                let boundary_ok = after
                    .chars()
                    .next()
                    .map(|c| !c.is_ascii_alphanumeric() && c != '_')
                    .unwrap_or(true);
                replaced.push_str(&rest[..position]);
                if boundary_ok {
                    replaced.push_str(&value);
                } else {
                    replaced.push_str(&needle);
                }
                rest = after;
            }
            replaced.push_str(rest);
            result = replaced;
        }
        result
    }

    /// Evaluates one expression against the current bindings.
    pub fn eval_expression(&self, expression: &str) -> anyhow::Result<ScriptValue> {
        let parsed = parse_expression(expression)?;
        let scope = Scope {
            vars: &self.vars,
            output: &self.output,
        };
        scope.eval(&parsed)
    }

    /// Evaluates an assertion: strips an outer `${...}` wrapper, evaluates,
    /// and coerces to boolean.
    pub fn evaluate_assertion(&self, raw: &str) -> Result<bool, RunnerError> {
        let expression = strip_expression_wrapper(raw);
        if expression.is_empty() {
            return Err(RunnerError::Script("assertion expression is empty".to_string()));
        }
        self.eval_expression(expression)
            .map(|value| value.truthy())
            .map_err(|error| RunnerError::Script(error.to_string()))
    }

    /// Executes a script body (assignments, `output.*` writes, bare
    /// expressions), then merges the `output` record back into the variable
    /// table in string form.
    pub fn run_script(&mut self, script: &str) -> Result<(), RunnerError> {
        let statements = parse_statements(script).map_err(|error| RunnerError::Script(error.to_string()))?;
        for statement in statements {
            self.run_statement(statement)?;
        }
        self.merge_output();
        Ok(())
    }

    fn run_statement(&mut self, statement: Statement) -> Result<(), RunnerError> {
        match statement {
            Statement::AssignVar { name, expr } => {
                let value = self.eval_parsed(&expr)?;
                self.vars.insert(name, value.to_display_string());
            }
            Statement::AssignOutput { field, expr } => {
                let value = self.eval_parsed(&expr)?;
                self.output.insert(field, value);
            }
            Statement::Expr(expr) => {
                self.eval_parsed(&expr)?;
            }
        }
        Ok(())
    }

    fn eval_parsed(&self, expr: &expr::Expr) -> Result<ScriptValue, RunnerError> {
        let scope = Scope {
            vars: &self.vars,
            output: &self.output,
        };
        scope.eval(expr).map_err(|error| RunnerError::Script(error.to_string()))
    }

    /// Copies every `output` key into the variable table as a string. The
    /// table is the authoritative store between steps; the copy is one-way.
    fn merge_output(&mut self) {
        for (name, value) in &self.output {
            self.vars.insert(name.clone(), value.to_display_string());
        }
    }

    /// Expands variables, strips underscores (`10_000` reads as `10000`),
    /// and parses; returns `default` on empty or unparseable input.
    pub fn parse_int(&self, text: Option<&str>, default: i64) -> i64 {
        let Some(text) = text else {
            return default;
        };
        let expanded = self.expand(text);
        let cleaned: String = expanded.chars().filter(|c| *c != '_').collect();
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return default;
        }
        trimmed.parse().unwrap_or(default)
    }

    /// Resolves a referenced file against the current flow directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        match &self.flow_dir {
            Some(flow_dir) => flow_dir.join(candidate),
            None => candidate.to_path_buf(),
        }
    }

    pub fn flow_dir(&self) -> Option<PathBuf> {
        self.flow_dir.clone()
    }

    /// Updated when entering a sub-flow loaded from file; restored on exit.
    pub fn set_flow_dir(&mut self, dir: Option<PathBuf>) {
        self.flow_dir = dir;
    }

    pub fn set_copied_text(&mut self, text: impl Into<String>) {
        self.copied_text = Some(text.into());
    }

    pub fn copied_text(&self) -> Option<&str> {
        self.copied_text.as_deref()
    }
}

/// Strips an outer `${ ... }` wrapper and trims, mirroring how assertions
/// are authored in flow files.
fn strip_expression_wrapper(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed.strip_prefix("${") {
        let inner = inner.strip_suffix('}').unwrap_or(inner);
        return inner.trim();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(vars: &[(&str, &str)]) -> ScriptEngine {
        let mut engine = ScriptEngine::default();
        for (name, value) in vars {
            engine.set_var(*name, *value);
        }
        engine
    }

    #[test]
    fn expression_and_plain_expansion_agree() {
        let engine = engine_with(&[("VAR", "x")]);
        assert_eq!(engine.expand("${VAR}"), "x");
        assert_eq!(engine.expand("$VAR"), "x");
    }

    #[test]
    fn longest_name_wins_in_plain_substitution() {
        let engine = engine_with(&[("USER", "a"), ("USERNAME", "bob")]);
        assert_eq!(engine.expand("$USER"), "a");
        assert_eq!(engine.expand("$USERNAME"), "bob");
        assert_eq!(engine.expand("hi $USERNAME and $USER!"), "hi bob and a!");
    }

    #[test]
    fn substitution_respects_identifier_boundaries() {
        let engine = engine_with(&[("USER", "a")]);
        // `$USERX` must not be read as `$USER` followed by `X`.
        assert_eq!(engine.expand("$USERX"), "$USERX");
        assert_eq!(engine.expand("$USER-suffix"), "a-suffix");
    }

    #[test]
    fn unresolvable_expression_spans_are_left_intact() {
        let engine = engine_with(&[]);
        assert_eq!(engine.expand("${not valid ==}"), "${not valid ==}");
        assert_eq!(engine.expand("${unclosed"), "${unclosed");
    }

    #[test]
    fn with_env_vars_restores_the_exact_prior_state() {
        let mut engine = engine_with(&[("KEEP", "original")]);
        let scoped: IndexMap<String, String> = [("KEEP", "override"), ("FRESH", "new")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let saved = engine.with_env_vars(&scoped);
        assert_eq!(engine.get_var("KEEP"), Some("override"));
        assert_eq!(engine.get_var("FRESH"), Some("new"));

        engine.restore_env(saved);
        assert_eq!(engine.get_var("KEEP"), Some("original"));
        assert_eq!(engine.get_var("FRESH"), None);
    }

    #[test]
    fn parse_int_laws() {
        let mut engine = engine_with(&[]);
        assert_eq!(engine.parse_int(Some("10_000"), 0), 10_000);
        assert_eq!(engine.parse_int(Some(""), 42), 42);
        assert_eq!(engine.parse_int(None, 42), 42);
        engine.set_var("N", "7");
        assert_eq!(engine.parse_int(Some("${N}"), 0), 7);
        assert_eq!(engine.parse_int(Some("not a number"), 3), 3);
    }

    #[test]
    fn assertion_strips_wrapper_and_coerces() {
        let engine = engine_with(&[("READY", "true"), ("COUNT", "2")]);
        assert!(engine.evaluate_assertion("${READY}").unwrap());
        assert!(engine.evaluate_assertion("COUNT == 2").unwrap());
        assert!(!engine.evaluate_assertion("${COUNT == 3}").unwrap());
        // Undefined env-shaped identifier is falsy, not an error.
        assert!(!engine.evaluate_assertion("${FEATURE_FLAG}").unwrap());
        // Malformed expressions surface as script errors.
        assert!(engine.evaluate_assertion("${==}").is_err());
    }

    #[test]
    fn run_script_merges_output_into_the_variable_table() {
        let mut engine = engine_with(&[]);
        engine
            .run_script("output.token = 'abc'\noutput.attempts = 3\nGREETING = 'hello'")
            .unwrap();
        assert_eq!(engine.get_var("token"), Some("abc"));
        assert_eq!(engine.get_var("attempts"), Some("3"));
        assert_eq!(engine.get_var("GREETING"), Some("hello"));
        // Output survives for later member access.
        assert!(engine.evaluate_assertion("output.token == 'abc'").unwrap());
    }

    #[test]
    fn define_variables_expands_values() {
        let mut engine = engine_with(&[("HOST", "example.com")]);
        let variables: IndexMap<String, String> = [("URL", "https://$HOST/login")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        engine.define_variables(&variables);
        assert_eq!(engine.get_var("URL"), Some("https://example.com/login"));
    }

    #[test]
    fn resolve_path_joins_relative_paths_with_the_flow_dir() {
        let mut engine = engine_with(&[]);
        assert_eq!(engine.resolve_path("sub.yaml"), PathBuf::from("sub.yaml"));
        engine.set_flow_dir(Some(PathBuf::from("/flows/app")));
        assert_eq!(engine.resolve_path("sub.yaml"), PathBuf::from("/flows/app/sub.yaml"));
        assert_eq!(engine.resolve_path("/abs/other.yaml"), PathBuf::from("/abs/other.yaml"));
    }

    #[test]
    fn for_flow_seeds_app_id_and_flow_env() {
        let config = FlowConfig {
            app_id: Some("com.example.app".into()),
            env: [("GREETING".to_string(), "hi".to_string())].into_iter().collect(),
            source_path: Some(PathBuf::from("/flows/login.yaml")),
            ..Default::default()
        };
        let engine = ScriptEngine::for_flow(&config, Some(Platform::Android));
        assert_eq!(engine.get_var("APP_ID"), Some("com.example.app"));
        assert_eq!(engine.get_var("GREETING"), Some("hi"));
        assert_eq!(engine.flow_dir(), Some(PathBuf::from("/flows")));
        assert_eq!(engine.platform(), Some(Platform::Android));
    }
}
