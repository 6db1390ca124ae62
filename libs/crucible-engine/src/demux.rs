//! Decoder for the docker multiplexed attach stream.
//!
//! With Tty disabled the daemon interleaves stdout and stderr on one
//! connection, framing each payload as:
//!
//! ```text
//! [tag: 1 byte][reserved: 3 bytes][payload length: u32 be][payload]
//! ```
//!
//! The decoder is stateful: bytes of an incomplete trailing frame are
//! carried into the next `feed` call, so frame boundaries never have to
//! line up with network chunk boundaries.

const HEADER_LEN: usize = 8;

const TAG_STDOUT: u8 = 1;
const TAG_STDERR: u8 = 2;

#[derive(Debug, Default)]
pub struct StreamDemux {
    carry: Vec<u8>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one received chunk, appending complete frames to the
    /// matching buffer and retaining any partial trailing frame.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        let mut offset = 0;
        while self.carry.len() - offset >= HEADER_LEN {
            let header = &self.carry[offset..offset + HEADER_LEN];
            let payload_len =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if self.carry.len() - offset - HEADER_LEN < payload_len {
                // Partial payload: wait for the next chunk.
                break;
            }
            let payload = &self.carry[offset + HEADER_LEN..offset + HEADER_LEN + payload_len];
            match header[0] {
                TAG_STDOUT => self.stdout.extend_from_slice(payload),
                TAG_STDERR => self.stderr.extend_from_slice(payload),
                // Tag 0 is the daemon echoing stdin; anything else is
                // skipped by its declared length.
                _ => {}
            }
            offset += HEADER_LEN + payload_len;
        }
        self.carry.drain(..offset);
    }

    /// Bytes buffered but not yet attributable to a stream.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Finish the stream and return the accumulated `(stdout, stderr)`.
    /// Container output is not guaranteed to be UTF-8, so decoding is
    /// lossy rather than fallible.
    pub fn finish(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}
