use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stdout placeholder returned when a run produced no output at all.
pub const NO_OUTPUT_SENTINEL: &str = "Code executed successfully, but no output was produced";

/// Redaction markers for hidden test cases. Hidden cases must never leak
/// their input or the literal expected/actual text to the requester.
pub const HIDDEN_INPUT: &str = "(hidden)";
pub const HIDDEN_CORRECT: &str = "(correct)";
pub const HIDDEN_INCORRECT: &str = "(incorrect)";

/// Raised when a request names a language the engine has no profile for.
/// This is a caller error and fails before any container interaction.
#[derive(Debug, Clone, Error)]
#[error("unsupported language '{0}' (supported: python, javascript, java, cpp)")]
pub struct UnsupportedLanguage(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Java,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Javascript,
        Language::Java,
        Language::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            "java" => Ok(Language::Java),
            "cpp" | "c++" => Ok(Language::Cpp),
            other => Err(UnsupportedLanguage(other.to_string())),
        }
    }
}

/// One sandboxed run: source code, language, optional stdin payload.
/// Immutable once submitted; owned by exactly one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// A named source file for multi-file (project) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

/// Multi-file execution request. The entry file is picked per language
/// convention by the engine, not named here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRequest {
    pub files: Vec<SourceFile>,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

/// Final outcome of one sandboxed run. Produced exactly once per request;
/// every failure mode surfaces here as populated stderr, never as a panic
/// or rejected call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// Build the caller-facing result from raw collected streams: trailing
    /// whitespace is trimmed and a fully silent successful run gets the
    /// no-output sentinel so downstream UIs always have something to show.
    pub fn from_streams(stdout: &str, stderr: &str, elapsed_ms: u64) -> Self {
        let stdout = stdout.trim_end().to_string();
        let stderr = stderr.trim_end().to_string();
        let stdout = if stdout.is_empty() && stderr.is_empty() {
            NO_OUTPUT_SENTINEL.to_string()
        } else {
            stdout
        };
        Self {
            stdout,
            stderr,
            elapsed_ms,
        }
    }

    /// Result shape for a run that failed before or instead of producing
    /// program output (timeout, provisioning error, engine failure).
    pub fn failure(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            elapsed_ms,
        }
    }
}

/// One input/expected-output pair. Ordering within the owning task is
/// significant and echoed back by index in results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
}

/// Per-case grading outcome. For hidden cases `input` and `actual_output`
/// are redacted to the fixed markers; only pass/fail is revealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub index: usize,
    pub passed: bool,
    pub input: String,
    pub actual_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated pass/fail report for one test run. Derived, never persisted
/// by the engine; grading bookkeeping belongs to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub total: usize,
    pub passed: usize,
    pub results: Vec<TestCaseResult>,
}
