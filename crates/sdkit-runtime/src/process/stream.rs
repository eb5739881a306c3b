//! Async pipe line readers (non-UTF8-safe).
//!
//! stable-diffusion.cpp can emit non-UTF8 bytes on stdout/stderr, and
//! `BufReader::lines()` would kill the reader task on the first invalid
//! sequence. Read byte lines and decode lossily instead so log streaming
//! stays robust.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Spawn a task reading `stream` line by line into `tx`.
///
/// The sender is dropped on EOF or read error, so a consumer draining the
/// paired receiver observes end-of-output once every reader is done.
pub(crate) fn spawn_line_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    stream_type: &'static str,
    tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }

                    let line = String::from_utf8_lossy(&buf).to_string();
                    if tx.send(line).await.is_err() {
                        // Consumer gone
                        break;
                    }
                }
                Err(e) => {
                    debug!(%stream_type, error = %e, "pipe reader exiting due to read error");
                    break;
                }
            }
        }

        debug!(%stream_type, "pipe reader task exiting");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_and_closes_on_eof() {
        let data: &[u8] = b"first\nsecond\r\nthird";
        let (tx, mut rx) = mpsc::channel(8);
        spawn_line_reader(data, "stdout", tx);

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
        assert_eq!(rx.recv().await.as_deref(), Some("third"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let data: &[u8] = b"ok\n\xff\xfe bad bytes\n";
        let (tx, mut rx) = mpsc::channel(8);
        spawn_line_reader(data, "stderr", tx);

        assert_eq!(rx.recv().await.as_deref(), Some("ok"));
        let lossy = rx.recv().await.unwrap();
        assert!(lossy.contains("bad bytes"));
        assert!(rx.recv().await.is_none());
    }
}
