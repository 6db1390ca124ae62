//! Source injection into a running container.
//!
//! Code travels as a base64 argument decoded inside the container rather
//! than as raw shell interpolation: the payload alphabet is shell-inert,
//! so arbitrary code content (quotes, backticks, EOF markers) cannot break
//! out of the write command.

use base64::{engine::general_purpose, Engine as _};
use tracing::warn;

use crucible_common::types::SourceFile;

use crate::docker::{ContainerHandle, ContainerManager};
use crate::error::{EngineError, Result};
use crate::language::{LanguageProfile, WORKDIR};

/// Guardrail against pathological submissions reaching the daemon.
pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;

/// Encoded payload per write command. The payload travels as part of a
/// single `sh -c` argument and the kernel caps one argument string at
/// 128 KiB (MAX_ARG_STRLEN), so larger sources go over as appended
/// chunks. Multiple of 4, so every chunk is self-contained base64.
const CHUNK_ENCODED_BYTES: usize = 64 * 1024;

/// Write the submitted source into the container under its
/// language-conventional name and return that file name.
pub async fn write_source(
    manager: &ContainerManager,
    handle: &ContainerHandle,
    profile: &LanguageProfile,
    code: &str,
) -> Result<String> {
    let file_name = profile.source_file(code);
    write_file(manager, handle, &file_name, code).await?;
    Ok(file_name)
}

/// Write one named file into the container workdir.
pub async fn write_file(
    manager: &ContainerManager,
    handle: &ContainerHandle,
    name: &str,
    content: &str,
) -> Result<()> {
    validate_file_name(name)?;
    if content.len() > MAX_SOURCE_BYTES {
        return Err(EngineError::InvalidRequest(format!(
            "source file '{name}' exceeds {MAX_SOURCE_BYTES} bytes"
        )));
    }

    let chunks = encoded_chunks(content);
    if chunks.is_empty() {
        return run_write(manager, handle, name, &format!(": > {WORKDIR}/{name}")).await;
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let redirect = if i == 0 { ">" } else { ">>" };
        let command = format!("printf %s {chunk} | base64 -d {redirect} {WORKDIR}/{name}");
        run_write(manager, handle, name, &command).await?;
    }
    Ok(())
}

async fn run_write(
    manager: &ContainerManager,
    handle: &ContainerHandle,
    name: &str,
    command: &str,
) -> Result<()> {
    let output = manager.exec_capture(handle.name(), command).await?;
    if output.exit_code != Some(0) {
        return Err(EngineError::Protocol(format!(
            "failed to write {name} into container: {}",
            output.stderr.trim()
        )));
    }
    Ok(())
}

/// Base64-encode and split at chunk boundaries that are themselves valid
/// base64, so the decoded chunks concatenate back to the original bytes.
fn encoded_chunks(content: &str) -> Vec<String> {
    general_purpose::STANDARD
        .encode(content)
        .as_bytes()
        .chunks(CHUNK_ENCODED_BYTES)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

/// Best-effort removal of written sources and compiled artifacts. Only
/// meaningful for persistent containers (an ephemeral workdir dies with
/// its container); failures are logged, never propagated.
pub async fn remove_artifacts(manager: &ContainerManager, handle: &ContainerHandle) {
    if handle.is_ephemeral() {
        return;
    }
    let command = format!("rm -rf {WORKDIR}/* || true");
    if let Err(e) = manager.exec_capture(handle.name(), &command).await {
        warn!(container = %handle.name(), error = %e, "artifact cleanup failed");
    }
}

/// File names are written unquoted into a shell redirect, so only accept
/// plain workdir-relative names.
fn validate_file_name(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if plain {
        Ok(())
    } else {
        Err(EngineError::InvalidRequest(format!(
            "invalid source file name '{name}'"
        )))
    }
}

/// Validate a project file set before any container work happens.
pub fn validate_project_files(files: &[SourceFile]) -> Result<()> {
    if files.is_empty() {
        return Err(EngineError::InvalidRequest(
            "project contains no source files".to_string(),
        ));
    }
    for file in files {
        validate_file_name(&file.name)?;
    }
    Ok(())
}
