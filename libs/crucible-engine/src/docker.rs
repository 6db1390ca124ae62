//! Container lifecycle management.
//!
//! Two flavors of sandbox container:
//! - *ephemeral*: created per request with a unique name, always removed
//!   afterwards, whatever the outcome;
//! - *persistent*: one fixed, externally provisioned container per
//!   language, (re)started on demand and never removed by the engine.
//!
//! The central correctness property is that an ephemeral container always
//! reaches the removed state, on every exit path.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

use crucible_common::types::Language;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::language::WORKDIR;

/// Identifies one sandbox container and its lifecycle flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerHandle {
    Ephemeral { name: String },
    Persistent { name: String, language: Language },
}

impl ContainerHandle {
    pub fn name(&self) -> &str {
        match self {
            ContainerHandle::Ephemeral { name } => name,
            ContainerHandle::Persistent { name, .. } => name,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ContainerHandle::Ephemeral { .. })
    }
}

/// Mapping from language to the well-known persistent container name.
/// Injected into the executor at construction time; there is no ambient
/// process-wide registry.
#[derive(Debug, Clone)]
pub struct ContainerRegistry {
    names: HashMap<Language, String>,
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        let names = Language::ALL
            .iter()
            .map(|&lang| (lang, format!("crucible-persist-{lang}")))
            .collect();
        Self { names }
    }
}

impl ContainerRegistry {
    pub fn with_name(mut self, language: Language, name: impl Into<String>) -> Self {
        self.names.insert(language, name.into());
        self
    }

    pub fn name_for(&self, language: Language) -> &str {
        self.names
            .get(&language)
            .map(String::as_str)
            .expect("registry covers every Language variant")
    }
}

/// Raw captured output of one attached exec, before any normalization.
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
}

pub struct ContainerManager {
    docker: Docker,
    config: EngineConfig,
    registry: ContainerRegistry,
}

impl ContainerManager {
    pub fn new(config: EngineConfig, registry: ContainerRegistry) -> Result<Self> {
        let docker =
            Docker::connect_with_socket(&config.docker_socket, 120, API_DEFAULT_VERSION)?;
        Ok(Self {
            docker,
            config,
            registry,
        })
    }

    /// Create and start a one-shot container for a single request.
    ///
    /// The container idles on `sleep infinity` so the engine can run
    /// discrete commands against it via exec. Networking is disabled, the
    /// memory/CPU ceilings come from config, and the only writable mount
    /// is a nosuid tmpfs workdir (exec stays allowed there because
    /// compiled-language binaries run from it).
    pub async fn acquire_ephemeral(&self, language: Language) -> Result<ContainerHandle> {
        let name = ephemeral_name();
        // A container of this name should never pre-exist; removal is
        // idempotent, so a stale leftover cannot wedge the run.
        self.force_remove(&name).await?;

        let image = self.config.image_for(language);
        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            WORKDIR.to_string(),
            format!("rw,exec,nosuid,size={}m", self.config.memory_limit_mb.min(64)),
        );
        let host_config = HostConfig {
            memory: Some(self.config.memory_limit_bytes()),
            nano_cpus: Some(self.config.nano_cpus()),
            tmpfs: Some(tmpfs),
            ..Default::default()
        };
        let container_config = Config {
            image: Some(image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            entrypoint: Some(vec![]),
            working_dir: Some(WORKDIR.to_string()),
            network_disabled: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), container_config)
            .await?;
        // The container exists from this point on. If start fails, or the
        // owning task is cancelled before the handle reaches the caller,
        // the guard still forces removal.
        let guard = ContainerGuard {
            docker: self.docker.clone(),
            name: Some(name.clone()),
        };
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await?;
        guard.disarm();

        debug!(container = %name, %language, %image, "ephemeral container started");
        Ok(ContainerHandle::Ephemeral { name })
    }

    /// Look up the fixed per-language container and make sure it is
    /// running. The container itself is provisioned externally; its
    /// absence is an operations problem, reported as `ContainerMissing`.
    pub async fn acquire_persistent(&self, language: Language) -> Result<ContainerHandle> {
        let name = self.registry.name_for(language).to_string();
        let inspect = match self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => {
                return Err(EngineError::ContainerMissing {
                    name,
                    language,
                    image: self.config.image_for(language),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            debug!(container = %name, %language, "starting stopped persistent container");
            self.docker
                .start_container(&name, None::<StartContainerOptions<String>>)
                .await?;
            // Give the freshly started container a moment to settle
            // before execs are thrown at it.
            tokio::time::sleep(Duration::from_millis(self.config.start_settle_ms)).await;
        }

        Ok(ContainerHandle::Persistent { name, language })
    }

    /// Tear down an ephemeral container; no-op for persistent ones.
    /// Idempotent and infallible by contract: the container may already be
    /// gone from an earlier failure path, and a cleanup error must never
    /// mask the primary result.
    pub async fn release(&self, handle: &ContainerHandle) {
        match handle {
            ContainerHandle::Persistent { name, .. } => {
                debug!(container = %name, "persistent container left running");
            }
            ContainerHandle::Ephemeral { name } => {
                match self
                    .docker
                    .stop_container(name, Some(StopContainerOptions { t: 0 }))
                    .await
                {
                    Ok(()) => {}
                    Err(e) if is_not_found(&e) || is_not_modified(&e) => {}
                    Err(e) => warn!(container = %name, error = %e, "stop failed"),
                }
                if let Err(e) = self.force_remove(name).await {
                    warn!(container = %name, error = %e, "remove failed");
                }
                debug!(container = %name, "ephemeral container removed");
            }
        }
    }

    async fn force_remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Backstop guard for an ephemeral container: if the owning task is
    /// cancelled or panics before the explicit release runs, dropping the
    /// guard still forces removal. `disarm` after a successful release.
    pub fn removal_guard(&self, handle: &ContainerHandle) -> ContainerGuard {
        let name = match handle {
            ContainerHandle::Ephemeral { name } => Some(name.clone()),
            ContainerHandle::Persistent { .. } => None,
        };
        ContainerGuard {
            docker: self.docker.clone(),
            name,
        }
    }

    /// Create an exec instance for a shell command inside the container.
    /// Stdin is attached only when the request actually carries input.
    pub async fn create_exec(
        &self,
        container: &str,
        command: &str,
        attach_stdin: bool,
    ) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ]),
            attach_stdin: Some(attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            working_dir: Some(WORKDIR.to_string()),
            ..Default::default()
        };
        let exec = self.docker.create_exec(container, options).await?;
        Ok(exec.id)
    }

    /// Run a short housekeeping command through an attached exec and
    /// collect its output. Used for source injection and artifact removal,
    /// not for the sandboxed run itself.
    pub async fn exec_capture(&self, container: &str, command: &str) -> Result<ExecOutput> {
        let exec_id = self.create_exec(container, command, false).await?;
        let start = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        let results = self.docker.start_exec(&exec_id, Some(start)).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = results {
            while let Some(msg) = output.next().await {
                match msg {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec_id).await?;
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code,
        })
    }
}

/// Removal-on-drop guard for ephemeral containers. Drop cannot be async,
/// so the removal is spawned; it is idempotent against the normal release
/// path having already run.
pub struct ContainerGuard {
    docker: Docker,
    name: Option<String>,
}

impl ContainerGuard {
    /// The container reached the removed state through the normal path;
    /// the guard has nothing left to protect.
    pub fn disarm(mut self) {
        self.name = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            let docker = self.docker.clone();
            tokio::spawn(async move {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                match docker.remove_container(&name, Some(options)).await {
                    Ok(()) => warn!(container = %name, "guard removed orphaned container"),
                    Err(e) if is_not_found(&e) => {}
                    Err(e) => warn!(container = %name, error = %e, "guard removal failed"),
                }
            });
        }
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

/// Unique per-request container name: timestamp plus random suffix.
fn ephemeral_name() -> String {
    let stamp = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("crucible-{stamp}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_defaults_cover_all_languages() {
        let registry = ContainerRegistry::default();
        for lang in Language::ALL {
            assert_eq!(
                registry.name_for(lang),
                format!("crucible-persist-{lang}")
            );
        }
    }

    #[test]
    fn registry_name_override() {
        let registry =
            ContainerRegistry::default().with_name(Language::Cpp, "judge-cpp-0");
        assert_eq!(registry.name_for(Language::Cpp), "judge-cpp-0");
        assert_eq!(registry.name_for(Language::Python), "crucible-persist-python");
    }

    #[test]
    fn ephemeral_names_are_unique_and_prefixed() {
        let a = ephemeral_name();
        let b = ephemeral_name();
        assert_ne!(a, b);
        assert!(a.starts_with("crucible-"));
        // timestamp-suffix shape: crucible-<millis>-<8 hex chars>
        let suffix = a.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn handle_accessors() {
        let handle = ContainerHandle::Ephemeral {
            name: "crucible-1-abc".to_string(),
        };
        assert!(handle.is_ephemeral());
        assert_eq!(handle.name(), "crucible-1-abc");

        let handle = ContainerHandle::Persistent {
            name: "crucible-persist-java".to_string(),
            language: Language::Java,
        };
        assert!(!handle.is_ephemeral());
    }
}
