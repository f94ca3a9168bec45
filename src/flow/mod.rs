//! Flow Runner (spec.md §4.6).
//!
//! Drives a flow's steps through the `Ready → (Condition eval) → [Skipped |
//! PreScript → Execute → PostScript → (Extract) → Advance]` state machine,
//! a "walk an ordered list, thread result state forward" shape generalized
//! from a topological DAG walk down to a sequential step list with loops,
//! conditional skip, and goto.

use crate::domain::model::{BodyType, Flow, FlowStep, HistoryRecord, Method};
use crate::domain::PersistencePort;
use crate::executor::{ExecuteResult, ExecutionInput, RequestExecutor};
use crate::script::types::FlowAction;
use crate::script::ScriptResult;
use crate::storage::FileStoragePort;
use crate::variables::ScopeChain;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Builds the `ExecutionInput` a step should run with: if `request_id` points
/// at a saved request, start from that request and let any non-empty inline
/// field on the step override it (spec.md §3 FlowStep, §4.6).
async fn resolve_execution_input(
    step: &FlowStep,
    persistence: &dyn PersistencePort,
    workspace_id: i64,
) -> ExecutionInput {
    let mut input: ExecutionInput = match step.request_id {
        Some(request_id) => match persistence.get_request(workspace_id, request_id).await {
            Ok(spec) => (&spec).into(),
            Err(_) => ExecutionInput::default(),
        },
        None => ExecutionInput::default(),
    };

    if !step.name.is_empty() {
        input.name = step.name.clone();
    }
    if let Some(method) = step.method {
        input.method = method;
    } else if input.method == Method::default() && step.request_id.is_none() {
        input.method = Method::Get;
    }
    if !step.url.is_empty() {
        input.url = step.url.clone();
    }
    if !step.headers.is_empty() {
        input.headers = step.headers.clone();
    }
    if !step.cookies.is_empty() {
        input.cookies = step.cookies.clone();
    }
    if !step.body.is_empty() {
        input.body = step.body.clone();
    }
    if let Some(body_type) = step.body_type {
        input.body_type = body_type;
    } else if step.request_id.is_none() {
        input.body_type = BodyType::None;
    }
    if !step.form_fields.is_empty() {
        input.form_fields = step.form_fields.clone();
    }
    if step.proxy_id.is_some() {
        input.proxy_id = step.proxy_id;
    }
    if !step.pre_script.is_empty() {
        input.pre_script = step.pre_script.clone();
    }
    if !step.post_script.is_empty() {
        input.post_script = step.post_script.clone();
    }
    input
}

pub const MAX_REPEAT_PER_STEP: u32 = 1000;
pub const MAX_GOTO_PER_FLOW: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct StepRunResult {
    pub step_id: i64,
    pub step_name: String,
    pub iteration: u32,
    pub loop_count: u32,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    /// Set on the first iteration when `FlowStep.loop_count` exceeded
    /// `MAX_REPEAT_PER_STEP` and was capped (spec.md §8: "1,001 caps at
    /// 1,000 with a limit-exceeded error").
    pub loop_limit_exceeded: bool,
    pub execute_result: Option<ExecuteResult>,
    pub extracted_vars: std::collections::HashMap<String, String>,
    pub pre_script_result: Option<ScriptResult>,
    pub post_script_result: Option<ScriptResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub success: bool,
    pub steps: Vec<StepRunResult>,
    pub error: Option<String>,
}

pub struct FlowRunner<'a> {
    executor: &'a RequestExecutor,
    persistence: &'a dyn PersistencePort,
    storage: &'a dyn FileStoragePort,
    workspace_id: i64,
}

impl<'a> FlowRunner<'a> {
    pub fn new(
        executor: &'a RequestExecutor,
        persistence: &'a dyn PersistencePort,
        storage: &'a dyn FileStoragePort,
        workspace_id: i64,
    ) -> Self {
        Self { executor, persistence, storage, workspace_id }
    }

    async fn record_history(&self, step: &FlowStep, flow: &Flow, result: &ExecuteResult) {
        let record = HistoryRecord {
            id: 0,
            workspace_id: self.workspace_id,
            request_id: step.request_id,
            flow_id: Some(flow.id),
            method: step.method.unwrap_or(Method::Get).as_str().to_string(),
            url: result.resolved_url.clone(),
            request_headers: serde_json::to_value(&result.resolved_headers).unwrap_or_default(),
            request_body: String::new(),
            status_code: if result.status_code == 0 { None } else { Some(result.status_code as i64) },
            response_headers: serde_json::to_value(&result.headers).unwrap_or_default(),
            response_body: result.body.clone(),
            duration_ms: result.duration_ms as i64,
            error: result.error.clone(),
            body_size: result.body_size as i64,
            is_binary: result.is_binary,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.persistence.record_history(record).await {
            tracing::warn!(error = %e, "failed to record flow step history");
        }
    }

    /// `scope` carries the environment/collection/workspace scopes already
    /// loaded by the caller (spec.md §4.1); any caller-supplied initial
    /// runtime variables must already be merged into `scope.runtime`.
    pub async fn run(
        &self,
        flow: &Flow,
        mut steps: Vec<FlowStep>,
        selected_step_ids: Option<&HashSet<i64>>,
        mut scope: ScopeChain,
        proxy_url_for: impl Fn(Option<i64>) -> Option<String>,
    ) -> FlowResult {
        steps.sort_by_key(|s| s.step_order);
        let mut run_results = Vec::new();
        let mut goto_count = 0u32;
        let mut idx = 0usize;

        while idx < steps.len() {
            let step = steps[idx].clone();

            if let Some(ids) = selected_step_ids {
                if !ids.contains(&step.id) {
                    run_results.push(skipped(&step, "not in selected step ids".into()));
                    idx += 1;
                    continue;
                }
            }

            if let Some(cond) = &step.condition {
                match crate::script::condition::evaluate(cond, &scope) {
                    Ok(true) => {}
                    Ok(false) => {
                        run_results.push(skipped(&step, "condition evaluated false".into()));
                        idx += 1;
                        continue;
                    }
                    Err(e) => {
                        run_results.push(skipped(&step, format!("condition error: {e}")));
                        idx += 1;
                        continue;
                    }
                }
            }

            let loop_limit_exceeded = step.loop_count > MAX_REPEAT_PER_STEP;
            let loop_count = step.loop_count.max(1).min(MAX_REPEAT_PER_STEP);
            let input = resolve_execution_input(&step, self.persistence, self.workspace_id).await;
            let mut repeats_this_step = 0u32;
            let mut iteration = 1u32;
            let mut next_index = idx + 1;
            let mut flow_ended = false;

            'iterations: while iteration <= loop_count {
                scope.runtime.insert("__iteration__".into(), iteration.to_string());
                scope.runtime.insert("__loopCount__".into(), loop_count.to_string());
                scope.runtime.insert("__stepName__".into(), step.name.clone());
                scope.runtime.insert("__stepOrder__".into(), step.step_order.to_string());
                scope.runtime.insert("__flowName__".into(), flow.name.clone());
                scope.runtime.insert("__timestamp__".into(), chrono::Utc::now().to_rfc3339());
                scope.runtime.insert("__uuid__".into(), Uuid::new_v4().to_string());

                let proxy_url = proxy_url_for(step.proxy_id);
                let result = self
                    .executor
                    .execute(
                        &input,
                        &mut scope,
                        proxy_url.as_deref(),
                        self.persistence,
                        self.storage,
                        self.workspace_id,
                    )
                    .await;

                scope.runtime.insert("__statusCode__".into(), result.status_code.to_string());
                scope.runtime.insert("__responseTime__".into(), result.duration_ms.to_string());
                scope.runtime.insert("__responseBody__".into(), result.body.clone());

                let mut extracted = std::collections::HashMap::new();
                if result.error.is_none() {
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&result.body) {
                        for (name, path) in &step.extract_vars {
                            if let Some(v) = jsonpath_lib::select(&json, path)
                                .ok()
                                .and_then(|v| v.first().cloned().cloned())
                            {
                                let s = match &v {
                                    serde_json::Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                scope.runtime.insert(name.clone(), s.clone());
                                extracted.insert(name.clone(), s);
                            }
                        }
                    }
                }

                let pre_script_result = result.pre_script_result.clone();
                let post_script_result = result.post_script_result.clone();
                let transport_failed = result.error.is_some();

                self.record_history(&step, flow, &result).await;

                run_results.push(StepRunResult {
                    step_id: step.id,
                    step_name: step.name.clone(),
                    iteration,
                    loop_count,
                    skipped: false,
                    skip_reason: None,
                    loop_limit_exceeded: loop_limit_exceeded && iteration == 1,
                    execute_result: Some(result),
                    extracted_vars: extracted,
                    pre_script_result: pre_script_result.clone(),
                    post_script_result: post_script_result.clone(),
                });

                if transport_failed && !step.continue_on_error {
                    return FlowResult {
                        success: false,
                        steps: run_results,
                        error: Some("transport error ended the flow".to_string()),
                    };
                }

                // Post-script is authoritative when it ran; otherwise a
                // pre-script `stop`/`goto`/`repeat` (which prevented the
                // request from ever going out) still drives flow control.
                let script_action = post_script_result
                    .as_ref()
                    .map(|r| r.flow_action)
                    .or_else(|| pre_script_result.as_ref().map(|r| r.flow_action));
                match script_action {
                    Some(FlowAction::Stop) => {
                        flow_ended = true;
                        break 'iterations;
                    }
                    Some(FlowAction::Goto) => {
                        goto_count += 1;
                        if goto_count > MAX_GOTO_PER_FLOW {
                            return FlowResult {
                                success: false,
                                steps: run_results,
                                error: Some("goto limit exceeded".to_string()),
                            };
                        }
                        let target = post_script_result
                            .as_ref()
                            .or(pre_script_result.as_ref())
                            .and_then(|r| resolve_goto_target(&steps, r));
                        match target {
                            Some(target_idx) => {
                                next_index = target_idx;
                                break 'iterations;
                            }
                            None => {
                                return FlowResult {
                                    success: false,
                                    steps: run_results,
                                    error: Some("goto target not found or ambiguous".to_string()),
                                };
                            }
                        }
                    }
                    Some(FlowAction::Repeat) => {
                        repeats_this_step += 1;
                        if repeats_this_step > MAX_REPEAT_PER_STEP {
                            return FlowResult {
                                success: false,
                                steps: run_results,
                                error: Some("repeat limit exceeded".to_string()),
                            };
                        }
                        continue 'iterations;
                    }
                    Some(FlowAction::Next) | None => {}
                }

                if step.delay_ms > 0 && iteration < loop_count {
                    tokio::time::sleep(std::time::Duration::from_millis(step.delay_ms)).await;
                }
                iteration += 1;
            }

            if flow_ended {
                return FlowResult { success: true, steps: run_results, error: None };
            }
            idx = next_index;
        }

        FlowResult { success: true, steps: run_results, error: None }
    }
}

fn skipped(step: &FlowStep, reason: String) -> StepRunResult {
    StepRunResult {
        step_id: step.id,
        step_name: step.name.clone(),
        iteration: 0,
        loop_count: step.loop_count,
        skipped: true,
        skip_reason: Some(reason),
        loop_limit_exceeded: false,
        execute_result: None,
        extracted_vars: std::collections::HashMap::new(),
        pre_script_result: None,
        post_script_result: None,
    }
}

/// Resolves a `goto` target by step name (exact, case-sensitive; ambiguous
/// matches are an error) or 1-based `stepOrder` (spec.md §4.6).
fn resolve_goto_target(steps: &[FlowStep], result: &ScriptResult) -> Option<usize> {
    if let Some(name) = &result.goto_step_name {
        let matches: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| &s.name == name)
            .map(|(i, _)| i)
            .collect();
        return match matches.len() {
            1 => Some(matches[0]),
            _ => None,
        };
    }
    if let Some(order) = result.goto_step_order {
        return steps.iter().position(|s| s.step_order == order);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_step(id: i64, order: i64, name: &str) -> FlowStep {
        FlowStep {
            id,
            flow_id: 1,
            request_id: None,
            step_order: order,
            delay_ms: 0,
            extract_vars: Default::default(),
            condition: None,
            loop_count: 1,
            pre_script: String::new(),
            post_script: String::new(),
            continue_on_error: false,
            name: name.to_string(),
            method: Some(Method::Get),
            url: "https://example.invalid".to_string(),
            headers: vec![],
            body: String::new(),
            body_type: None,
            form_fields: vec![],
            proxy_id: None,
            cookies: Default::default(),
        }
    }

    #[test]
    fn goto_resolves_by_unique_name() {
        let steps = vec![make_step(1, 1, "a"), make_step(2, 2, "b")];
        let mut result = ScriptResult::default();
        result.goto_step_name = Some("b".to_string());
        assert_eq!(resolve_goto_target(&steps, &result), Some(1));
    }

    #[test]
    fn goto_by_ambiguous_name_fails() {
        let steps = vec![make_step(1, 1, "dup"), make_step(2, 2, "dup")];
        let mut result = ScriptResult::default();
        result.goto_step_name = Some("dup".to_string());
        assert_eq!(resolve_goto_target(&steps, &result), None);
    }

    #[test]
    fn goto_resolves_by_step_order() {
        let steps = vec![make_step(1, 1, "a"), make_step(2, 2, "b")];
        let mut result = ScriptResult::default();
        result.goto_step_order = Some(2);
        assert_eq!(resolve_goto_target(&steps, &result), Some(1));
    }
}
