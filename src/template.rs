//! Small internal Jinja-subset renderer.
//!
//! Recognised syntax is `{{ expr }}` where `expr` is either a bare
//! identifier looked up in the current [`TemplateContext`], or
//! `env("NAME")` / `env("NAME", "default")`. No other Jinja constructs
//! (filters, conditionals, loops) are supported — the domain only ever
//! needs variable substitution, so a Turing-complete template language
//! would be the wrong tool (see the design notes this crate is built to).

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EXPR_RE: Regex = Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").unwrap();
    static ref ENV_CALL_RE: Regex =
        Regex::new(r#"^env\(\s*"([^"]+)"\s*(?:,\s*"([^"]*)"\s*)?\)$"#).unwrap();
}

/// Errors raised while expanding a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `{{ name }}` referenced a variable that isn't in the context and has
    /// no default.
    UndefinedVariable(String),
    /// `{{ expr }}` didn't parse as a bare identifier or an `env(...)` call.
    InvalidExpression(String),
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TemplateError::UndefinedVariable(name) => {
                write!(f, "undefined template variable: {name}")
            }
            TemplateError::InvalidExpression(expr) => {
                write!(f, "invalid template expression: {{{{ {expr} }}}}")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// The variables available while rendering one blueprint field.
///
/// `goarch`, `target` and `src` are only populated in the contexts where
/// they make sense (§4.1): `src` is only bound for install/script bodies,
/// `goarch`/`target` are only bound while rendering a `fetch` URL.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    /// An empty context with no bound variables.
    pub fn new() -> Self {
        TemplateContext::default()
    }

    /// Bind `name` to `value`, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Look up a bound variable by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Expand every `{{ expr }}` occurrence in `input` against `ctx`, left to
/// right, in a single non-recursive pass. Rendering an already-rendered
/// string is a no-op (idempotence, §8 invariant 7) because the output
/// never contains `{{`/`}}` unless the source data itself did.
pub fn render(input: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    // `Regex::replace_all` doesn't propagate errors from the closure, so the
    // first error is captured here and returned after the scan completes.
    let mut error: Option<TemplateError> = None;
    let expanded = EXPR_RE.replace_all(input, |caps: &regex::Captures| {
        if error.is_some() {
            return String::new();
        }
        let expr = caps[1].trim();
        match eval_expr(expr, ctx) {
            Ok(value) => value,
            Err(e) => {
                error = Some(e);
                String::new()
            }
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(expanded.into_owned()),
    }
}

fn eval_expr(expr: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    if let Some(caps) = ENV_CALL_RE.captures(expr) {
        let name = &caps[1];
        return match std::env::var(name) {
            Ok(value) => Ok(value),
            Err(_) => match caps.get(2) {
                Some(default) => Ok(default.as_str().to_string()),
                None => Err(TemplateError::UndefinedVariable(format!("env(\"{name}\")"))),
            },
        };
    }

    if is_identifier(expr) {
        return ctx
            .get(expr)
            .map(str::to_string)
            .ok_or_else(|| TemplateError::UndefinedVariable(expr.to_string()));
    }

    Err(TemplateError::InvalidExpression(expr.to_string()))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext::new()
            .with("version", "1.2.3")
            .with("goarch", "amd64")
    }

    #[test]
    fn substitutes_bare_identifiers() {
        let out = render("v{{version}}-{{goarch}}", &ctx()).unwrap();
        assert_eq!(out, "v1.2.3-amd64");
    }

    #[test]
    fn tolerates_extra_whitespace() {
        let out = render("{{  version  }}", &ctx()).unwrap();
        assert_eq!(out, "1.2.3");
    }

    #[test]
    fn undefined_variable_fails() {
        let err = render("{{missing}}", &ctx()).unwrap_err();
        assert_eq!(err, TemplateError::UndefinedVariable("missing".to_string()));
    }

    #[test]
    fn env_with_default_falls_back() {
        let out = render(r#"{{ env("OPS2DEB_TEST_DOES_NOT_EXIST", "fallback") }}"#, &ctx()).unwrap();
        assert_eq!(out, "fallback");
    }

    #[test]
    fn env_without_default_and_unset_fails() {
        let err = render(r#"{{ env("OPS2DEB_TEST_DOES_NOT_EXIST") }}"#, &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable(_)));
    }

    #[test]
    fn rendering_twice_is_idempotent() {
        let once = render("v{{version}}", &ctx()).unwrap();
        let twice = render(&once, &ctx()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        let err = render("{{ version | upper }}", &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidExpression(_)));
    }
}
