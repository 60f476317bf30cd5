//! Bounded output capture
//!
//! A runaway process can write unbounded output. Captures keep at most
//! `limit` bytes per stream and keep draining the pipe so the child never
//! blocks on a full buffer.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8192;

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Shared, size-bounded sink for one output stream.
///
/// The reader task appends; the runner can snapshot at any time, which is
/// how partial output survives a timeout.
#[derive(Debug, Clone)]
pub struct BoundedCapture {
    limit: usize,
    inner: Arc<Mutex<Buffer>>,
}

impl BoundedCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            inner: Arc::new(Mutex::new(Buffer::default())),
        }
    }

    fn push(&self, chunk: &[u8]) {
        let Ok(mut buf) = self.inner.lock() else {
            return;
        };
        let room = self.limit.saturating_sub(buf.bytes.len());
        if chunk.len() > room {
            buf.truncated = true;
        }
        let take = chunk.len().min(room);
        buf.bytes.extend_from_slice(&chunk[..take]);
    }

    /// Drain `reader` to EOF into this capture.
    pub async fn drain<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => self.push(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    }

    /// Current contents as lossy UTF-8 plus the truncation flag.
    pub fn snapshot(&self) -> (String, bool) {
        match self.inner.lock() {
            Ok(buf) => (String::from_utf8_lossy(&buf.bytes).into_owned(), buf.truncated),
            Err(_) => (String::new(), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_truncates_at_limit() {
        let capture = BoundedCapture::new(4);
        let data: &[u8] = b"abcdefgh";
        capture.clone().drain(data).await;
        let (text, truncated) = capture.snapshot();
        assert_eq!(text, "abcd");
        assert!(truncated);
    }

    #[tokio::test]
    async fn test_capture_under_limit() {
        let capture = BoundedCapture::new(64);
        let data: &[u8] = b"hello";
        capture.clone().drain(data).await;
        assert_eq!(capture.snapshot(), ("hello".to_string(), false));
    }
}
