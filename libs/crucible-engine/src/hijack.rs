//! Raw transport for `exec/{id}/start`.
//!
//! The control plane goes through bollard, but the exec output has to be
//! available as the daemon's raw multiplexed byte stream so it can be fed
//! to [`crate::demux::StreamDemux`], and stdin has to be writable and
//! half-closable on the same connection. Both come from hijacking the
//! start endpoint: one HTTP/1.1 upgrade request over the unix socket,
//! after which the connection is a plain bidirectional byte pipe.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::error::{EngineError, Result};

const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// A live hijacked exec connection. Dropping it tears the transport down,
/// which is exactly what the timeout race relies on for cancellation.
pub struct ExecStream {
    reader: OwnedReadHalf,
    writer: Option<OwnedWriteHalf>,
    /// Stream bytes that arrived in the same read as the response head.
    leftover: Vec<u8>,
}

/// Start a previously created exec instance and hand back the hijacked
/// stream. The exec must have been created with `tty: false` so output
/// stays demultiplexable.
pub async fn start_exec(socket_path: &str, exec_id: &str) -> Result<ExecStream> {
    let stream = UnixStream::connect(socket_path).await?;
    let (mut reader, mut writer) = stream.into_split();

    let body = r#"{"Detach":false,"Tty":false}"#;
    let request = format!(
        "POST /exec/{exec_id}/start HTTP/1.1\r\n\
         Host: localhost\r\n\
         Content-Type: application/json\r\n\
         Connection: Upgrade\r\n\
         Upgrade: tcp\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    );
    writer.write_all(request.as_bytes()).await?;
    writer.flush().await?;

    // Read up to the blank line terminating the response head; any bytes
    // past it already belong to the multiplexed stream.
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    let leftover = loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(EngineError::Protocol(
                "daemon closed the connection during the exec-start handshake".to_string(),
            ));
        }
        head.extend_from_slice(&buf[..n]);
        if let Some(end) = find_head_end(&head) {
            break head.split_off(end);
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(EngineError::Protocol(
                "oversized response head on exec-start".to_string(),
            ));
        }
    };

    let status_line = head
        .split(|&b| b == b'\r')
        .next()
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .unwrap_or_default();
    // 101 with the upgrade headers; older daemons answer 200 and stream
    // on the same connection anyway.
    let status = status_line.split_whitespace().nth(1);
    if !matches!(status, Some("101") | Some("200")) {
        return Err(EngineError::Protocol(format!(
            "exec-start rejected: {status_line}"
        )));
    }

    Ok(ExecStream {
        reader,
        writer: Some(writer),
        leftover,
    })
}

impl ExecStream {
    /// Write a stdin payload to the exec'd process.
    pub async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(data).await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Half-close the connection so the process sees EOF on stdin.
    /// Idempotent.
    pub async fn close_stdin(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "stdin shutdown failed");
            }
        }
    }

    /// Read the next chunk of raw multiplexed bytes. Returns 0 at natural
    /// end of stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.leftover.is_empty() {
            let n = self.leftover.len().min(buf.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover.drain(..n);
            return Ok(n);
        }
        Ok(self.reader.read(buf).await?)
    }
}

fn find_head_end(head: &[u8]) -> Option<usize> {
    head.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}
