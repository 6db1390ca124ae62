//! Automated test harness: run a submission against ordered test cases
//! and aggregate pass/fail results.
//!
//! Grading itself is pure — (case, raw outcome) in, graded result out —
//! and knows nothing about docker, so it is fully testable without a
//! daemon. The async loop around it owns sequencing and the outer
//! per-case guard timeout.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use crucible_common::types::{
    ExecutionRequest, ExecutionResult, Language, TestCase, TestCaseResult, TestRunSummary,
    HIDDEN_CORRECT, HIDDEN_INCORRECT, HIDDEN_INPUT,
};

use crate::error::{EngineError, Result};
use crate::executor::Executor;

/// Raw outcome of one test case execution, before grading.
#[derive(Debug)]
enum CaseOutcome {
    Finished(ExecutionResult),
    /// Engine-level failure or outer guard expiry; the message lands in
    /// the result's `error` field.
    Errored(String),
}

/// Run `code` against every test case in order and report per-case
/// pass/fail plus an aggregate count.
///
/// Cases execute strictly sequentially: the shared container handle is
/// not reentrant-safe, so case n+1 only starts once case n has resolved.
/// Each case is additionally wrapped in an outer guard timeout independent
/// of the executor's own budget; a hung case is recorded as failed with an
/// error and iteration continues.
pub async fn run_tests(
    executor: &Executor,
    code: &str,
    language: Language,
    cases: &[TestCase],
) -> Result<TestRunSummary> {
    if cases.is_empty() {
        return Err(EngineError::InvalidRequest(
            "at least one test case is required".to_string(),
        ));
    }
    if code.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "source code is empty".to_string(),
        ));
    }

    let guard = Duration::from_millis(executor.config().case_guard_ms);
    let mut results = Vec::with_capacity(cases.len());

    for (index, case) in cases.iter().enumerate() {
        let request = ExecutionRequest {
            code: code.to_string(),
            language,
            stdin: Some(case.input.clone()),
        };

        let outcome = match timeout(guard, executor.execute(&request)).await {
            Ok(Ok(result)) => CaseOutcome::Finished(result),
            Ok(Err(e)) => CaseOutcome::Errored(e.to_string()),
            Err(_) => CaseOutcome::Errored(format!(
                "test case exceeded the {} ms guard",
                guard.as_millis()
            )),
        };

        let graded = grade(index, case, outcome);
        debug!(index, passed = graded.passed, "test case graded");
        results.push(graded);
    }

    let passed = results.iter().filter(|r| r.passed).count();
    info!(total = cases.len(), passed, %language, "test run complete");

    Ok(TestRunSummary {
        total: cases.len(),
        passed,
        results,
    })
}

/// Grade one case. The comparison text is stderr when non-empty (a crash
/// or compile diagnostic can never match), otherwise stdout. Hidden cases
/// reveal only a correctness marker.
fn grade(index: usize, case: &TestCase, outcome: CaseOutcome) -> TestCaseResult {
    let (passed, actual, error) = match outcome {
        CaseOutcome::Finished(result) => {
            let actual = if result.stderr.is_empty() {
                result.stdout
            } else {
                result.stderr
            };
            let passed = normalize(&actual) == normalize(&case.expected_output);
            (passed, actual, None)
        }
        CaseOutcome::Errored(message) => (false, String::new(), Some(message)),
    };

    if case.hidden {
        TestCaseResult {
            index,
            passed,
            input: HIDDEN_INPUT.to_string(),
            actual_output: if passed {
                HIDDEN_CORRECT.to_string()
            } else {
                HIDDEN_INCORRECT.to_string()
            },
            error,
        }
    } else {
        TestCaseResult {
            index,
            passed,
            input: case.input.clone(),
            actual_output: actual,
            error,
        }
    }
}

/// Normalize output for comparison: line endings unified, leading and
/// trailing whitespace ignored, internal content untouched.
fn normalize(output: &str) -> String {
    output.replace("\r\n", "\n").trim().to_string()
}
