//! JSON DSL script dialect (spec.md §4.2).
//!
//! A script is a JSON document with three optional top-level sections:
//! `assertions[]`, `setVariables[]`, `flow`. A hand-rolled interpreter
//! targeting a small typed AST rather than round-tripping through an
//! embedded language.

use crate::script::condition;
use crate::script::types::{FlowAction, ScriptContext, ScriptResult};
use crate::variables::{resolve, ScopeChain};
use serde_json::Value;

pub const MAX_ASSERTIONS: usize = 50;
pub const MAX_VAR_OPS: usize = 100;

fn scope_of(ctx: &ScriptContext) -> ScopeChain {
    ScopeChain {
        runtime: ctx.runtime_vars.clone(),
        environment: ctx.environment_vars.clone(),
        collections: vec![ctx.collection_vars.clone()],
        workspace: ctx.workspace_vars.clone(),
    }
}

pub fn run(script: &str, ctx: &mut ScriptContext) -> ScriptResult {
    let mut result = ScriptResult::default();

    let doc: Value = match serde_json::from_str(script) {
        Ok(v) => v,
        Err(e) => {
            result.success = false;
            result.errors.push(format!("invalid DSL script: {e}"));
            result.flow_action = FlowAction::Stop;
            return result;
        }
    };

    if let Some(assertions) = doc.get("assertions").and_then(Value::as_array) {
        if assertions.len() > MAX_ASSERTIONS {
            return result.limit_exceeded("assertions");
        }
        for a in assertions {
            run_assertion(a, ctx, &mut result);
        }
    }

    if let Some(set_vars) = doc.get("setVariables").and_then(Value::as_array) {
        if set_vars.len() > MAX_VAR_OPS {
            return result.limit_exceeded("variable operations");
        }
        for entry in set_vars {
            apply_set_variable(entry, ctx, &mut result);
        }
    }

    if let Some(flow) = doc.get("flow") {
        apply_flow(flow, ctx, &mut result);
    }

    result
}

fn run_assertion(a: &Value, ctx: &ScriptContext, result: &mut ScriptResult) {
    let assertion_type = a.get("type").and_then(Value::as_str).unwrap_or("");
    let operator = a.get("operator").and_then(Value::as_str).unwrap_or("eq");
    let expected = a.get("expected").cloned().unwrap_or(Value::Null);

    let Some(response) = &ctx.response else {
        result.record_assertion(false, format!("{assertion_type}: no response to assert against"));
        return;
    };

    let observed: Value = match assertion_type {
        "status" => Value::from(response.status),
        "responseTime" => Value::from(response.response_time_ms),
        "header" => {
            let name = a.get("name").and_then(Value::as_str).unwrap_or("");
            match response.header(name) {
                Some(v) => Value::String(v.to_string()),
                None => Value::Null,
            }
        }
        "bodyContains" => Value::String(response.body.clone()),
        "jsonpath" => {
            let path = a.get("path").and_then(Value::as_str).unwrap_or("$");
            match response.json() {
                Ok(json) => jsonpath_lib::select(&json, path)
                    .ok()
                    .and_then(|v| v.first().cloned().cloned())
                    .unwrap_or(Value::Null),
                Err(e) => {
                    result.record_assertion(false, format!("jsonpath {path}: invalid JSON body ({e})"));
                    return;
                }
            }
        }
        other => {
            result.record_assertion(false, format!("unknown assertion type `{other}`"));
            return;
        }
    };

    let passed = eval_operator(operator, &observed, &expected);
    let desc = format!(
        "{assertion_type} {operator} {expected}: observed {observed}",
        expected = expected,
        observed = observed
    );
    result.record_assertion(passed, desc);
}

fn eval_operator(op: &str, observed: &Value, expected: &Value) -> bool {
    match op {
        "exists" => !observed.is_null(),
        "eq" => observed == expected,
        "ne" => observed != expected,
        "contains" => match (observed.as_str(), expected.as_str()) {
            (Some(o), Some(e)) => o.contains(e),
            _ => false,
        },
        "in" => expected.as_array().is_some_and(|arr| arr.contains(observed)),
        "regex" => match (observed.as_str(), expected.as_str()) {
            (Some(o), Some(pattern)) => regex::Regex::new(pattern).map(|re| re.is_match(o)).unwrap_or(false),
            _ => false,
        },
        "gt" | "gte" | "lt" | "lte" => {
            let (Some(o), Some(e)) = (as_f64(observed), as_f64(expected)) else {
                return false;
            };
            match op {
                "gt" => o > e,
                "gte" => o >= e,
                "lt" => o < e,
                "lte" => o <= e,
                _ => unreachable!(),
            }
        }
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn apply_set_variable(entry: &Value, ctx: &mut ScriptContext, result: &mut ScriptResult) {
    let Some(name) = entry.get("name").and_then(Value::as_str) else {
        result.errors.push("setVariables entry missing `name`".into());
        return;
    };

    let new_value = if let Some(v) = entry.get("value").and_then(Value::as_str) {
        resolve(v, &scope_of(ctx)).text
    } else if let Some(path) = entry.get("from").and_then(Value::as_str) {
        match ctx.response.as_ref().map(|r| r.json()) {
            Some(Ok(json)) => jsonpath_lib::select(&json, path)
                .ok()
                .and_then(|v| v.first().map(|v| value_to_string(v)))
                .unwrap_or_default(),
            _ => String::new(),
        }
    } else if entry.get("increment").and_then(Value::as_bool).unwrap_or(false) {
        let by = entry.get("by").and_then(Value::as_f64).unwrap_or(1.0);
        let current: f64 = ctx.runtime_vars.get(name).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        format_number(current + by)
    } else if entry.get("decrement").and_then(Value::as_bool).unwrap_or(false) {
        let by = entry.get("by").and_then(Value::as_f64).unwrap_or(1.0);
        let current: f64 = ctx.runtime_vars.get(name).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        format_number(current - by)
    } else if let Some(expr) = entry.get("math").and_then(Value::as_str) {
        let substituted = resolve(expr, &scope_of(ctx)).text;
        match eval_math(&substituted) {
            Ok(n) => format_number(n),
            Err(e) => {
                result.errors.push(format!("math expression error: {e}"));
                return;
            }
        }
    } else if let Some(parts) = entry.get("concat").and_then(Value::as_array) {
        parts
            .iter()
            .filter_map(Value::as_str)
            .map(|p| resolve(p, &scope_of(ctx)).text)
            .collect::<Vec<_>>()
            .concat()
    } else if let Some(cond) = entry.get("conditional").and_then(Value::as_str) {
        let truthy = condition::evaluate(cond, &scope_of(ctx)).unwrap_or(false);
        let branch = if truthy { "ifTrue" } else { "ifFalse" };
        entry
            .get(branch)
            .and_then(Value::as_str)
            .map(|s| resolve(s, &scope_of(ctx)).text)
            .unwrap_or_default()
    } else {
        result.errors.push(format!("setVariables entry `{name}` has no recognized operation"));
        return;
    };

    ctx.runtime_vars.insert(name.to_string(), new_value.clone());
    result.updated_vars.insert(name.to_string(), new_value);
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn apply_flow(flow: &Value, ctx: &mut ScriptContext, result: &mut ScriptResult) {
    if let Some(action) = flow.get("action") {
        apply_action_object(flow, action, result);
        return;
    }
    if let Some(cond) = flow.get("conditional") {
        let expr = cond.get("if").and_then(Value::as_str).unwrap_or("false");
        let truthy = condition::evaluate(expr, &scope_of(ctx)).unwrap_or(false);
        let branch = if truthy { "onTrue" } else { "onFalse" };
        if let Some(action_obj) = cond.get(branch) {
            if let Some(action) = action_obj.get("action") {
                apply_action_object(action_obj, action, result);
            }
        }
        return;
    }
    if let Some(sw) = flow.get("switch") {
        if let Some(cases) = sw.get("cases").and_then(Value::as_array) {
            for case in cases {
                let when = case.get("when").and_then(Value::as_str).unwrap_or("false");
                if condition::evaluate(when, &scope_of(ctx)).unwrap_or(false) {
                    if let Some(action) = case.get("action") {
                        apply_action_object(case, action, result);
                    }
                    return;
                }
            }
        }
        if let Some(default) = sw.get("default") {
            if let Some(action) = default.get("action") {
                apply_action_object(default, action, result);
            }
        }
    }
}

fn apply_action_object(obj: &Value, action: &Value, result: &mut ScriptResult) {
    let action_str = action.as_str().unwrap_or("next");
    result.flow_action = match action_str {
        "next" => FlowAction::Next,
        "stop" => FlowAction::Stop,
        "repeat" => FlowAction::Repeat,
        "goto" => {
            let target = obj.get("target").or_else(|| obj.get("step"));
            match target {
                Some(Value::String(s)) => result.goto_step_name = Some(s.clone()),
                Some(Value::Number(n)) => result.goto_step_order = n.as_i64(),
                _ => {}
            }
            FlowAction::Goto
        }
        other => {
            result.errors.push(format!("unknown flow action `{other}`"));
            FlowAction::Next
        }
    };
}

/// Recursive-descent evaluator for `+ - * / % ( )` with standard precedence.
fn eval_math(expr: &str) -> Result<f64, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut pos = 0usize;
    let value = parse_add_sub(&chars, &mut pos)?;
    skip_ws(&chars, &mut pos);
    if pos != chars.len() {
        return Err(format!("trailing input in `{expr}`"));
    }
    Ok(value)
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

fn parse_add_sub(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_mul_div(chars, pos)?;
    loop {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            Some('+') => {
                *pos += 1;
                value += parse_mul_div(chars, pos)?;
            }
            Some('-') => {
                *pos += 1;
                value -= parse_mul_div(chars, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_mul_div(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_unary(chars, pos)?;
    loop {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            Some('*') => {
                *pos += 1;
                value *= parse_unary(chars, pos)?;
            }
            Some('/') => {
                *pos += 1;
                let rhs = parse_unary(chars, pos)?;
                if rhs == 0.0 {
                    return Err("division by zero".into());
                }
                value /= rhs;
            }
            Some('%') => {
                *pos += 1;
                let rhs = parse_unary(chars, pos)?;
                value %= rhs;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_unary(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    skip_ws(chars, pos);
    if chars.get(*pos) == Some(&'-') {
        *pos += 1;
        return Ok(-parse_unary(chars, pos)?);
    }
    parse_primary(chars, pos)
}

fn parse_primary(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    skip_ws(chars, pos);
    if chars.get(*pos) == Some(&'(') {
        *pos += 1;
        let v = parse_add_sub(chars, pos)?;
        skip_ws(chars, pos);
        if chars.get(*pos) != Some(&')') {
            return Err("expected `)`".into());
        }
        *pos += 1;
        return Ok(v);
    }
    let start = *pos;
    while *pos < chars.len() && (chars[*pos].is_ascii_digit() || chars[*pos] == '.') {
        *pos += 1;
    }
    if *pos == start {
        return Err(format!("expected number at position {start}"));
    }
    let s: String = chars[start..*pos].iter().collect();
    s.parse::<f64>().map_err(|_| format!("invalid number `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::types::ResponseSnapshot;

    fn ctx_with_status(status: u16) -> ScriptContext {
        ScriptContext {
            response: Some(ResponseSnapshot {
                status,
                headers: vec![],
                body: r#"{"userId": 1}"#.to_string(),
                response_time_ms: 42,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn status_assertion_passes() {
        let mut ctx = ctx_with_status(200);
        let script = r#"{"assertions":[{"type":"status","operator":"eq","expected":200}]}"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.assertions_passed, 1);
        assert_eq!(result.assertions_failed, 0);
    }

    #[test]
    fn jsonpath_extract_sets_variable() {
        let mut ctx = ctx_with_status(200);
        let script = r#"{"setVariables":[{"name":"userId","from":"$.userId"}]}"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.updated_vars.get("userId").unwrap(), "1");
    }

    #[test]
    fn increment_defaults_nonnumeric_to_zero() {
        let mut ctx = ScriptContext::default();
        let script = r#"{"setVariables":[{"name":"counter","increment":true}]}"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.updated_vars.get("counter").unwrap(), "1");
    }

    #[test]
    fn math_expression_precedence() {
        let mut ctx = ScriptContext::default();
        ctx.runtime_vars.insert("a".into(), "2".into());
        ctx.runtime_vars.insert("b".into(), "3".into());
        let script = r#"{"setVariables":[{"name":"x","math":"{{a}} + {{b}} * 2"}]}"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.updated_vars.get("x").unwrap(), "8");
    }

    #[test]
    fn flow_goto_by_name() {
        let mut ctx = ScriptContext::default();
        let script = r#"{"flow":{"action":"goto","target":"Step 2"}}"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.flow_action, FlowAction::Goto);
        assert_eq!(result.goto_step_name.as_deref(), Some("Step 2"));
    }

    #[test]
    fn too_many_assertions_hits_limit() {
        let mut ctx = ctx_with_status(200);
        let assertions: Vec<Value> = (0..60)
            .map(|_| serde_json::json!({"type":"status","operator":"eq","expected":200}))
            .collect();
        let script = serde_json::json!({"assertions": assertions}).to_string();
        let result = run(&script, &mut ctx);
        assert!(!result.success);
        assert_eq!(result.flow_action, FlowAction::Stop);
    }
}
