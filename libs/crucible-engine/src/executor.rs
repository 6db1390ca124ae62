//! Execution coordinator: drives one request end to end.
//!
//! Pipeline per run: acquire a container, inject the source, start the
//! command as a hijacked exec, optionally feed stdin, race output
//! collection against the wall-clock budget, then always clean up. Every
//! container-side failure is folded into the returned `ExecutionResult`;
//! callers only see `Err` for malformed requests.

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crucible_common::types::{ExecutionRequest, ExecutionResult, Language, ProjectRequest};

use crate::config::EngineConfig;
use crate::demux::StreamDemux;
use crate::docker::{ContainerHandle, ContainerManager, ContainerRegistry};
use crate::error::{EngineError, Result};
use crate::hijack;
use crate::inject;
use crate::language::LanguageProfile;

/// Container lifecycle flavor this executor runs with. Persistent mode
/// reuses one fixed container per language and provides no internal mutual
/// exclusion; callers that run concurrently must use ephemeral mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Ephemeral,
    Persistent,
}

pub struct Executor {
    manager: ContainerManager,
    config: EngineConfig,
    mode: ExecutionMode,
}

impl Executor {
    pub fn new(
        config: EngineConfig,
        registry: ContainerRegistry,
        mode: ExecutionMode,
    ) -> Result<Self> {
        let manager = ContainerManager::new(config.clone(), registry)?;
        Ok(Self {
            manager,
            config,
            mode,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run one submission. Never fails for ordinary execution problems:
    /// timeouts, compile errors, runtime crashes and provisioning issues
    /// all come back as an `ExecutionResult` with populated stderr.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        validate_code(&request.code)?;
        validate_stdin(request.stdin.as_deref())?;
        let started = Instant::now();
        let outcome = self.run_single(request).await;
        settle(outcome, started.elapsed().as_millis() as u64)
    }

    /// Multi-file variant: writes every file, runs the conventional entry
    /// file, under the larger project budget.
    pub async fn execute_project(&self, request: &ProjectRequest) -> Result<ExecutionResult> {
        inject::validate_project_files(&request.files)?;
        validate_stdin(request.stdin.as_deref())?;
        let profile = LanguageProfile::of(request.language);
        let entry = profile.entry_file(&request.files).ok_or_else(|| {
            EngineError::InvalidRequest(format!(
                "project has no {} entry file",
                request.language
            ))
        })?;
        let started = Instant::now();
        let outcome = self.run_project(request, &entry).await;
        settle(outcome, started.elapsed().as_millis() as u64)
    }

    async fn run_single(&self, request: &ExecutionRequest) -> Result<(String, String)> {
        let handle = self.acquire(request.language).await?;
        let guard = self.manager.removal_guard(&handle);

        let profile = LanguageProfile::of(request.language);
        let result = async {
            let file_name =
                inject::write_source(&self.manager, &handle, profile, &request.code).await?;
            let command = profile.run_command(&file_name);
            debug!(container = %handle.name(), %command, "starting sandboxed run");
            self.run_command(
                &handle,
                &command,
                request.stdin.as_deref(),
                self.config.run_timeout_ms,
            )
            .await
        }
        .await;

        self.cleanup(&handle).await;
        guard.disarm();
        result
    }

    async fn run_project(
        &self,
        request: &ProjectRequest,
        entry: &str,
    ) -> Result<(String, String)> {
        let handle = self.acquire(request.language).await?;
        let guard = self.manager.removal_guard(&handle);

        let result = async {
            for file in &request.files {
                inject::write_file(&self.manager, &handle, &file.name, &file.content).await?;
            }
            let command = LanguageProfile::of(request.language).run_command(entry);
            debug!(container = %handle.name(), %command, "starting project run");
            self.run_command(
                &handle,
                &command,
                request.stdin.as_deref(),
                self.config.project_timeout_ms,
            )
            .await
        }
        .await;

        self.cleanup(&handle).await;
        guard.disarm();
        result
    }

    /// Start the run command as a hijacked exec, feed stdin if present,
    /// and race output collection against the wall-clock budget. Losing
    /// the race drops the stream, which tears the transport down.
    async fn run_command(
        &self,
        handle: &ContainerHandle,
        command: &str,
        stdin: Option<&str>,
        limit_ms: u64,
    ) -> Result<(String, String)> {
        let exec_id = self
            .manager
            .create_exec(handle.name(), command, stdin.is_some())
            .await?;
        let mut stream = hijack::start_exec(&self.config.docker_socket, &exec_id).await?;

        // The stdin feed sits inside the raced future: a process that never
        // drains its pipe would otherwise block the write past every buffer
        // and wedge the run with no budget applied.
        let settle_ms = self.config.stdin_settle_ms;
        let collect = async {
            if let Some(input) = stdin {
                // Let the interpreter reach its read before input arrives.
                tokio::time::sleep(Duration::from_millis(settle_ms)).await;
                let mut payload = input.to_owned();
                if !payload.ends_with('\n') {
                    payload.push('\n');
                }
                stream.write_stdin(payload.as_bytes()).await?;
            }
            stream.close_stdin().await;

            let mut demux = StreamDemux::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = stream.read_chunk(&mut buf).await?;
                if n == 0 {
                    break;
                }
                demux.feed(&buf[..n]);
            }
            Ok::<_, EngineError>(demux.finish())
        };

        match timeout(Duration::from_millis(limit_ms), collect).await {
            Ok(streams) => streams,
            Err(_) => {
                warn!(container = %handle.name(), limit_ms, "run exceeded its budget");
                Err(EngineError::Timeout { limit_ms })
            }
        }
    }

    async fn acquire(&self, language: Language) -> Result<ContainerHandle> {
        match self.mode {
            ExecutionMode::Ephemeral => self.manager.acquire_ephemeral(language).await,
            ExecutionMode::Persistent => self.manager.acquire_persistent(language).await,
        }
    }

    /// Cleanup path shared by every exit: artifact removal then release,
    /// both tolerant of the container already being gone.
    async fn cleanup(&self, handle: &ContainerHandle) {
        inject::remove_artifacts(&self.manager, handle).await;
        self.manager.release(handle).await;
    }
}

/// Upper bound on a stdin payload, enforced before any container work.
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024;

fn validate_stdin(stdin: Option<&str>) -> Result<()> {
    if let Some(input) = stdin {
        if input.len() > MAX_STDIN_BYTES {
            return Err(EngineError::InvalidRequest(format!(
                "stdin exceeds {MAX_STDIN_BYTES} bytes"
            )));
        }
    }
    Ok(())
}

fn validate_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "source code is empty".to_string(),
        ));
    }
    if code.len() > inject::MAX_SOURCE_BYTES {
        return Err(EngineError::InvalidRequest(format!(
            "source code exceeds {} bytes",
            inject::MAX_SOURCE_BYTES
        )));
    }
    Ok(())
}

/// Classify the raw outcome into the caller-facing result. Request-shape
/// errors propagate; everything else becomes a structured result.
fn settle(outcome: Result<(String, String)>, elapsed_ms: u64) -> Result<ExecutionResult> {
    match outcome {
        Ok((stdout, stderr)) => Ok(ExecutionResult::from_streams(&stdout, &stderr, elapsed_ms)),
        Err(EngineError::Timeout { .. }) => {
            Ok(ExecutionResult::failure("Execution timed out", elapsed_ms))
        }
        Err(e @ (EngineError::InvalidRequest(_) | EngineError::UnsupportedLanguage(_))) => Err(e),
        Err(e) => {
            warn!(error = %e, "sandboxed run failed");
            Ok(ExecutionResult::failure(e.to_string(), elapsed_ms))
        }
    }
}
