//! Variable Resolver (spec.md §4.1)
//!
//! A single compiled regex substitutes `{{name}}` against a 4-level scope
//! chain in one non-recursive pass, the same "compile the pattern once,
//! `replace_all` over a snapshot map" shape lipeamarok's `Context::interpolate_str`
//! uses for its `${...}` syntax (`examples/lipeamarok-autonomous-quality-agent/runner/src/context/mod.rs`).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

/// A read-only snapshot of the four scopes consulted in priority order:
/// runtime → environment → collection chain (nearest first) → workspace.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    pub runtime: HashMap<String, String>,
    pub environment: HashMap<String, String>,
    /// Nearest-enclosing collection first, root collection last.
    pub collections: Vec<HashMap<String, String>>,
    pub workspace: HashMap<String, String>,
}

impl ScopeChain {
    pub fn lookup(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.runtime.get(name) {
            return Some(v);
        }
        if let Some(v) = self.environment.get(name) {
            return Some(v);
        }
        for scope in &self.collections {
            if let Some(v) = scope.get(name) {
                return Some(v);
            }
        }
        self.workspace.get(name).map(|s| s.as_str())
    }
}

/// Result of resolving a template string: the substituted text plus the
/// names that had no binding anywhere in the chain (spec.md §9 open
/// question — surfaced as a warning list rather than silently dropped).
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub text: String,
    pub unresolved: Vec<String>,
}

/// Resolves every `{{name}}` occurrence in `input` in a single pass.
/// Non-recursive: a substituted value's own `{{...}}` is left untouched,
/// which also makes `resolve(resolve(s)) == resolve(s)` whenever every name
/// exists (spec.md §8's idempotence invariant).
pub fn resolve(input: &str, scope: &ScopeChain) -> Resolved {
    let mut unresolved = Vec::new();
    let text = TEMPLATE_RE
        .replace_all(input, |caps: &regex::Captures| {
            let name = caps[1].trim();
            match scope.lookup(name) {
                Some(value) => value.to_string(),
                None => {
                    unresolved.push(name.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();
    Resolved { text, unresolved }
}

pub fn resolve_all<'a>(
    inputs: impl IntoIterator<Item = &'a str>,
    scope: &ScopeChain,
) -> (Vec<String>, Vec<String>) {
    let mut unresolved = Vec::new();
    let texts = inputs
        .into_iter()
        .map(|s| {
            let r = resolve(s, scope);
            unresolved.extend(r.unresolved);
            r.text
        })
        .collect();
    (texts, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with(runtime: &[(&str, &str)]) -> ScopeChain {
        ScopeChain {
            runtime: runtime.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_from_runtime_first() {
        let mut scope = scope_with(&[("base_url", "https://runtime.example")]);
        scope.workspace.insert("base_url".into(), "https://workspace.example".into());
        let r = resolve("{{base_url}}/posts/1", &scope);
        assert_eq!(r.text, "https://runtime.example/posts/1");
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn unknown_name_left_literal_and_reported() {
        let scope = ScopeChain::default();
        let r = resolve("{{missing}}", &scope);
        assert_eq!(r.text, "{{missing}}");
        assert_eq!(r.unresolved, vec!["missing".to_string()]);
    }

    #[test]
    fn substitution_is_non_recursive() {
        let scope = scope_with(&[("a", "{{b}}"), ("b", "final")]);
        let once = resolve("{{a}}", &scope).text;
        assert_eq!(once, "{{b}}");
        let twice = resolve(&once, &scope).text;
        assert_eq!(twice, "final");
    }

    #[test]
    fn idempotent_when_all_names_resolve() {
        let scope = scope_with(&[("x", "1")]);
        let once = resolve("v={{x}}", &scope).text;
        let twice = resolve(&once, &scope).text;
        assert_eq!(once, twice);
    }

    #[test]
    fn collection_chain_walks_nearest_first() {
        let mut scope = scope_with(&[]);
        scope.collections = vec![
            HashMap::from([("k".to_string(), "near".to_string())]),
            HashMap::from([("k".to_string(), "far".to_string())]),
        ];
        assert_eq!(resolve("{{k}}", &scope).text, "near");
    }
}
