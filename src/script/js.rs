//! Sandboxed JavaScript script dialect (spec.md §4.3).
//!
//! Grounded on the dedicated-worker-thread shape from
//! `examples/other_examples/e7270e89_swissarmyhammer-swissarmyhammer__swissarmyhammer-js-src-lib.rs.rs`
//! (`rquickjs::Runtime::new()` + `Context::full()`, `ctx.with(|ctx| ...)`),
//! with a fresh interpreter built per call rather than a process-global one,
//! since spec.md §5 requires scripts to run on a dedicated, single-threaded
//! VM per invocation.
//!
//! The high-level `pm.*` surface (the chai-style `expect` chain, `pm.test`)
//! is implemented in a JS prelude evaluated before the user script, calling
//! back into a small set of Rust-provided host functions for scope access,
//! response data, and outbound HTTP (`pm.sendRequest`, via a blocking
//! client since this thread is synchronous end to end).

use crate::script::types::{ErrorDetail, FlowAction, ScriptContext, ScriptResult};
use crate::variables::{resolve, ScopeChain};
use rquickjs::{CatchResultExt, Context, Ctx, Function, Object, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const WALL_CLOCK_LIMIT: Duration = Duration::from_secs(5);

const PRELUDE: &str = include_str!("pm_prelude.js");

/// Runs `script` against `ctx` on a dedicated OS thread with a 5s wall-clock
/// interrupt, returning once the thread finishes or the timeout fires.
pub fn run(script: &str, ctx: &mut ScriptContext) -> ScriptResult {
    let resolved_script = resolve(script, &scope_of(ctx)).text;
    let snapshot = ctx.clone();
    let (tx, rx) = mpsc::channel();
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_for_thread = interrupted.clone();

    let handle = std::thread::spawn(move || {
        let outcome = run_in_vm(&resolved_script, &snapshot, &interrupted_for_thread);
        let _ = tx.send(outcome);
    });

    let outcome = match rx.recv_timeout(WALL_CLOCK_LIMIT) {
        Ok(outcome) => outcome,
        Err(_) => {
            interrupted.store(true, Ordering::SeqCst);
            let mut timeout_result = ScriptResult::default();
            timeout_result.success = false;
            timeout_result.errors.push("script timed out after 5s".into());
            timeout_result.flow_action = FlowAction::Stop;
            timeout_result
        }
    };
    let _ = handle.join();

    if outcome.success || !outcome.errors.is_empty() {
        ctx.runtime_vars.extend(outcome.updated_vars.clone());
    }
    outcome
}

fn scope_of(ctx: &ScriptContext) -> ScopeChain {
    ScopeChain {
        runtime: ctx.runtime_vars.clone(),
        environment: ctx.environment_vars.clone(),
        collections: vec![ctx.collection_vars.clone()],
        workspace: ctx.workspace_vars.clone(),
    }
}

fn run_in_vm(script: &str, snapshot: &ScriptContext, interrupted: &Arc<AtomicBool>) -> ScriptResult {
    let result = Arc::new(std::sync::Mutex::new(ScriptResult::default()));

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => return failed(format!("failed to start JS runtime: {e}")),
    };
    {
        let interrupted = interrupted.clone();
        rt.set_interrupt_handler(Some(Box::new(move || interrupted.load(Ordering::SeqCst))));
    }

    let context = match Context::full(&rt) {
        Ok(c) => c,
        Err(e) => return failed(format!("failed to start JS context: {e}")),
    };

    let outcome: Result<(), String> = context.with(|ctx| {
        install_host_bindings(&ctx, snapshot, result.clone()).map_err(|e| e.to_string())?;
        ctx.eval::<(), _>(PRELUDE).catch(&ctx).map_err(|e| format!("prelude error: {e}"))?;
        match ctx.eval::<rquickjs::Value, _>(script).catch(&ctx) {
            Ok(_) => Ok(()),
            Err(e) => Err(describe_js_error(e)),
        }
    });

    let mut final_result = Arc::try_unwrap(result)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();

    if let Err(message) = outcome {
        final_result.success = false;
        final_result.errors.push(clean_message(&message));
        final_result.error_details.push(parse_error_detail(&message));
    }
    final_result
}

fn failed(message: String) -> ScriptResult {
    let mut r = ScriptResult::default();
    r.success = false;
    r.errors.push(message);
    r.flow_action = FlowAction::Stop;
    r
}

fn describe_js_error(e: rquickjs::CaughtError<'_>) -> String {
    e.to_string()
}

/// Strips engine-internal location suffixes (spec.md §4.3: "clean messages
/// without engine-internal location suffixes").
fn clean_message(raw: &str) -> String {
    raw.split(" at ").next().unwrap_or(raw).trim().to_string()
}

fn parse_error_detail(raw: &str) -> ErrorDetail {
    // rquickjs formats exceptions as "<message> at <file>:<line>:<col>".
    if let Some(idx) = raw.rfind(" at ") {
        let loc = &raw[idx + 4..];
        let parts: Vec<&str> = loc.rsplitn(3, ':').collect();
        if parts.len() >= 2 {
            let column = parts[0].parse().ok();
            let line = parts[1].parse().ok();
            return ErrorDetail { line, column, message: clean_message(raw) };
        }
    }
    ErrorDetail { line: None, column: None, message: clean_message(raw) }
}

/// Installs the low-level host functions the JS prelude builds `pm.*` on top of.
fn install_host_bindings<'js>(
    ctx: &Ctx<'js>,
    snapshot: &ScriptContext,
    result: Arc<std::sync::Mutex<ScriptResult>>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let host: Object = Object::new(ctx.clone())?;

    // -- scope get/set --
    for (scope_name, values) in [
        ("runtime", snapshot.runtime_vars.clone()),
        ("environment", snapshot.environment_vars.clone()),
        ("collection", snapshot.collection_vars.clone()),
        ("workspace", snapshot.workspace_vars.clone()),
    ] {
        let obj = Object::new(ctx.clone())?;
        for (k, v) in values {
            obj.set(k, v)?;
        }
        host.set(format!("__{scope_name}Vars"), obj)?;
    }

    {
        let result = result.clone();
        let set_runtime = Function::new(ctx.clone(), move |name: String, value: String| {
            let mut r = result.lock().unwrap();
            r.updated_vars.insert(name, value);
        })?;
        host.set("__setRuntimeVar", set_runtime)?;
    }
    {
        let result = result.clone();
        let set_env = Function::new(ctx.clone(), move |name: String, value: String| {
            let mut r = result.lock().unwrap();
            r.updated_env_vars.insert(name, value);
        })?;
        host.set("__setEnvVar", set_env)?;
    }

    // -- response snapshot --
    if let Some(response) = &snapshot.response {
        let resp_obj = Object::new(ctx.clone())?;
        resp_obj.set("status", response.status)?;
        resp_obj.set("responseTime", response.response_time_ms)?;
        resp_obj.set("body", response.body.clone())?;
        let headers = Object::new(ctx.clone())?;
        for (k, v) in &response.headers {
            headers.set(k.clone(), v.clone())?;
        }
        resp_obj.set("headers", headers)?;
        host.set("__response", resp_obj)?;
    }

    // -- request snapshot --
    let req_obj = Object::new(ctx.clone())?;
    req_obj.set("method", snapshot.request.method.clone())?;
    req_obj.set("url", snapshot.request.url.clone())?;
    req_obj.set("body", snapshot.request.body.clone())?;
    host.set("__request", req_obj)?;

    host.set("__iteration", snapshot.iteration)?;
    host.set("__loopCount", snapshot.loop_count)?;
    host.set("__requestName", snapshot.request_name.clone())?;

    {
        let result = result.clone();
        let record_assertion = Function::new(ctx.clone(), move |passed: bool, message: String| {
            result.lock().unwrap().record_assertion(passed, message);
        })?;
        host.set("__recordAssertion", record_assertion)?;
    }

    {
        let result = result.clone();
        let set_next_request = Function::new(ctx.clone(), move |target: Option<String>| {
            let mut r = result.lock().unwrap();
            match target {
                None => r.flow_action = FlowAction::Stop,
                Some(s) if s.is_empty() => r.flow_action = FlowAction::Stop,
                Some(s) => {
                    r.flow_action = FlowAction::Goto;
                    r.goto_step_name = Some(s);
                }
            }
        })?;
        host.set("__setNextRequest", set_next_request)?;
    }

    {
        let send_request = Function::new(ctx.clone(), move |url: String| -> String {
            let client = match reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
            {
                Ok(c) => c,
                Err(e) => return serde_json::json!({"error": e.to_string()}).to_string(),
            };
            match client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().unwrap_or_default();
                    serde_json::json!({"status": status, "body": body}).to_string()
                }
                Err(e) => serde_json::json!({"error": e.to_string()}).to_string(),
            }
        })?;
        host.set("__sendRequest", send_request)?;
    }

    globals.set("__host", host)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::types::ResponseSnapshot;

    #[test]
    fn pm_test_records_passing_assertion() {
        let mut ctx = ScriptContext {
            response: Some(ResponseSnapshot {
                status: 200,
                headers: vec![],
                body: "{}".into(),
                response_time_ms: 5,
            }),
            ..Default::default()
        };
        let script = r#"pm.test("ok", () => pm.response.to.have.status(200));"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.assertions_passed, 1);
        assert_eq!(result.assertions_failed, 0);
    }

    #[test]
    fn pm_test_records_failing_assertion_with_message() {
        let mut ctx = ScriptContext {
            response: Some(ResponseSnapshot {
                status: 500,
                headers: vec![],
                body: "{}".into(),
                response_time_ms: 5,
            }),
            ..Default::default()
        };
        let script = r#"pm.test("ok", () => pm.response.to.have.status(200));"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.assertions_failed, 1);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn pm_variables_set_is_captured_in_updated_vars() {
        let mut ctx = ScriptContext::default();
        let script = r#"pm.variables.set("x", "42");"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.updated_vars.get("x").unwrap(), "42");
    }

    #[test]
    fn execution_set_next_request_null_stops_flow() {
        let mut ctx = ScriptContext::default();
        let script = r#"pm.execution.setNextRequest(null);"#;
        let result = run(script, &mut ctx);
        assert_eq!(result.flow_action, FlowAction::Stop);
    }

    #[test]
    fn sandbox_blocks_eval_and_function_constructor() {
        let mut ctx = ScriptContext::default();
        let script = r#"eval("1+1");"#;
        let result = run(script, &mut ctx);
        assert!(!result.success);
    }
}
