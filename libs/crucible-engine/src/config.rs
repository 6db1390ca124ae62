// Engine configuration: docker endpoint, resource ceilings, timeouts and
// the fixed per-language image mapping. Defaults are compiled in; a JSON
// file can override any subset of fields.
use crucible_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::language::LanguageProfile;

pub const DEFAULT_CONFIG_PATH: &str = "config/crucible.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the docker daemon unix socket, used both by the control
    /// plane client and the hijacked exec streams.
    pub docker_socket: String,
    /// Wall-clock budget for a single-file run.
    pub run_timeout_ms: u64,
    /// Wall-clock budget for a multi-file (project) run.
    pub project_timeout_ms: u64,
    /// Outer per-test-case guard in the harness, independent of the
    /// executor's own budget.
    pub case_guard_ms: u64,
    /// Delay before stdin is written to a freshly started exec.
    pub stdin_settle_ms: u64,
    /// Delay after (re)starting a persistent container before it is used.
    pub start_settle_ms: u64,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    /// Per-language image overrides; languages not listed fall back to the
    /// profile's default image.
    pub images: HashMap<Language, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            run_timeout_ms: 10_000,
            project_timeout_ms: 15_000,
            case_guard_ms: 10_000,
            stdin_settle_ms: 100,
            start_settle_ms: 1_000,
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            images: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing file is an error here;
    /// use `load_or_default` when the file is optional.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::InvalidRequest(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::InvalidRequest(format!("malformed config: {e}")))
    }

    /// Load `config/crucible.json` if present, otherwise compiled-in
    /// defaults.
    pub fn load_or_default() -> Self {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        match Self::load(path) {
            Ok(config) => config,
            Err(_) => {
                tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
                Self::default()
            }
        }
    }

    pub fn image_for(&self, language: Language) -> String {
        self.images
            .get(&language)
            .cloned()
            .unwrap_or_else(|| LanguageProfile::of(language).default_image.to_string())
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}
