//! End-to-end tests against a live docker daemon.
//!
//! These run the real pipeline (container create/start, source injection,
//! hijacked exec, cleanup) and are ignored by default: they need a
//! reachable daemon plus the per-language images from the default config.
//! Run with `cargo test -- --ignored`.

use crucible_common::types::{
    ExecutionRequest, Language, TestCase, HIDDEN_CORRECT, HIDDEN_INPUT, NO_OUTPUT_SENTINEL,
};

use crate::config::EngineConfig;
use crate::docker::{ContainerManager, ContainerRegistry};
use crate::error::EngineError;
use crate::executor::{ExecutionMode, Executor};
use crate::harness::run_tests;

fn ephemeral_executor() -> Executor {
    Executor::new(
        EngineConfig::default(),
        ContainerRegistry::default(),
        ExecutionMode::Ephemeral,
    )
    .expect("docker daemon reachable")
}

#[tokio::test]
#[ignore]
async fn python_hello_world() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new("print('Hello')", Language::Python);

    let result = executor.execute(&request).await.unwrap();

    assert_eq!(result.stdout, "Hello");
    assert_eq!(result.stderr, "");
    assert!(result.elapsed_ms > 0);
}

#[tokio::test]
#[ignore]
async fn stdin_is_fed_to_the_program() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new(
        "a = int(input())\nb = int(input())\nprint(a + b)",
        Language::Python,
    )
    .with_stdin("5\n3");

    let result = executor.execute(&request).await.unwrap();

    assert_eq!(result.stdout, "8");
    assert_eq!(result.stderr, "");
}

#[tokio::test]
#[ignore]
async fn silent_program_gets_the_sentinel() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new("x = 1", Language::Python);

    let result = executor.execute(&request).await.unwrap();

    assert_eq!(result.stdout, NO_OUTPUT_SENTINEL);
}

#[tokio::test]
#[ignore]
async fn infinite_loop_hits_the_timeout() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new("while True:\n    pass", Language::Python);

    let started = std::time::Instant::now();
    let result = executor.execute(&request).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("timed out"));
    let budget = executor.config().run_timeout_ms;
    assert!(elapsed.as_millis() as u64 >= budget);
    // Bounded: budget plus container setup/teardown overhead.
    assert!(elapsed.as_millis() as u64 <= budget + 10_000);
}

#[tokio::test]
#[ignore]
async fn runtime_crash_surfaces_on_stderr() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new("raise ValueError('boom')", Language::Python);

    let result = executor.execute(&request).await.unwrap();

    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("ValueError"));
}

#[tokio::test]
#[ignore]
async fn cpp_compile_error_short_circuits() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new("int main() { return 0", Language::Cpp);

    let result = executor.execute(&request).await.unwrap();

    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("error"));
}

#[tokio::test]
#[ignore]
async fn java_class_name_drives_the_run() {
    let executor = ephemeral_executor();
    let request = ExecutionRequest::new(
        "public class Greeter { public static void main(String[] a) { System.out.println(\"hi\"); } }",
        Language::Java,
    );

    let result = executor.execute(&request).await.unwrap();

    assert_eq!(result.stdout, "hi");
}

#[tokio::test]
#[ignore]
async fn two_ephemeral_runs_are_deterministic() {
    let executor = ephemeral_executor();
    let request =
        ExecutionRequest::new("print(int(input()) * 2)", Language::Python).with_stdin("21");

    let first = executor.execute(&request).await.unwrap();
    let second = executor.execute(&request).await.unwrap();

    assert_eq!(first.stdout, second.stdout);
    assert_eq!(first.stderr, second.stderr);
}

#[tokio::test]
#[ignore]
async fn missing_persistent_container_has_zero_side_effects() {
    let registry = ContainerRegistry::default()
        .with_name(Language::Python, "crucible-persist-never-provisioned");
    let executor = Executor::new(
        EngineConfig::default(),
        registry,
        ExecutionMode::Persistent,
    )
    .unwrap();

    let result = executor
        .execute(&ExecutionRequest::new("print(1)", Language::Python))
        .await
        .unwrap();

    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("crucible-persist-never-provisioned"));
    assert!(result.stderr.contains("docker run"));
}

#[tokio::test]
#[ignore]
async fn release_is_idempotent() {
    let config = EngineConfig::default();
    let manager = ContainerManager::new(config, ContainerRegistry::default()).unwrap();

    let handle = manager.acquire_ephemeral(Language::Python).await.unwrap();
    manager.release(&handle).await;
    // The container is already gone; a second release must not fail.
    manager.release(&handle).await;
}

#[tokio::test]
#[ignore]
async fn harness_runs_cases_in_order_and_redacts_hidden() {
    let executor = ephemeral_executor();
    let code = "a = int(input())\nb = int(input())\nprint(a + b)";
    let cases = vec![
        TestCase {
            input: "5\n3".to_string(),
            expected_output: "8".to_string(),
            hidden: false,
        },
        TestCase {
            input: "1\n1".to_string(),
            expected_output: "3".to_string(),
            hidden: false,
        },
        TestCase {
            input: "10\n10".to_string(),
            expected_output: "20".to_string(),
            hidden: true,
        },
    ];

    let summary = run_tests(&executor, code, Language::Python, &cases)
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.passed, 2);
    for (i, result) in summary.results.iter().enumerate() {
        assert_eq!(result.index, i);
    }
    assert!(summary.results[0].passed);
    assert!(!summary.results[1].passed);
    assert_eq!(summary.results[2].input, HIDDEN_INPUT);
    assert_eq!(summary.results[2].actual_output, HIDDEN_CORRECT);
}

#[tokio::test]
async fn zero_test_cases_rejected_without_docker() {
    // Validation fires before any container work, so this needs no daemon.
    let executor = match Executor::new(
        EngineConfig::default(),
        ContainerRegistry::default(),
        ExecutionMode::Ephemeral,
    ) {
        Ok(executor) => executor,
        // No socket in this environment; the validation path is still
        // covered by the harness unit tests.
        Err(_) => return,
    };

    let err = run_tests(&executor, "print(1)", Language::Python, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}
