//! Script Engine (spec.md §4.2, §4.3, §9): dialect-agnostic entry point.

pub mod condition;
pub mod dsl;
pub mod js;
pub mod types;

pub use types::{detect_dialect, Dialect, RequestSnapshot, ResponseSnapshot, ScriptContext, ScriptResult};

/// Runs a pre- or post-script, dispatching to the DSL or JS interpreter by
/// leading character (spec.md §4.4, §9: "dialect selection is by first
/// non-whitespace character").
pub fn run(script: &str, ctx: &mut ScriptContext) -> ScriptResult {
    if script.trim().is_empty() {
        return ScriptResult::default();
    }
    match detect_dialect(script) {
        Dialect::Dsl => dsl::run(script, ctx),
        Dialect::JavaScript => js::run(script, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_is_a_noop_success() {
        let mut ctx = ScriptContext::default();
        let result = run("", &mut ctx);
        assert!(result.success);
        assert_eq!(result.assertions_passed, 0);
    }

    #[test]
    fn dsl_detected_by_leading_brace() {
        let mut ctx = ScriptContext::default();
        let result = run(r#"{"setVariables":[{"name":"x","value":"1"}]}"#, &mut ctx);
        assert_eq!(result.updated_vars.get("x").unwrap(), "1");
    }
}
