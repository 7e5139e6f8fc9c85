//! Combined stdout/stderr capture.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// stdout and stderr of one process merged into one byte stream
///
/// Chunks are appended in the order they are read, so text from the two
/// streams interleaves roughly as the process wrote it.
#[derive(Debug, Default)]
pub(crate) struct CombinedOutput {
    pub(crate) bytes: Vec<u8>,
    pub(crate) stderr_seen: bool,
}

impl CombinedOutput {
    /// Read both streams until each reaches EOF.
    ///
    /// Both are read concurrently so a process blocked on one full pipe never
    /// stalls. Data read before an error or a cancelled await stays in `self`.
    pub(crate) async fn drain<O, E>(&mut self, stdout: O, stderr: E) -> io::Result<()>
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut stdout = Some(stdout);
        let mut stderr = Some(stderr);
        let mut out_buf = vec![0u8; CHUNK_SIZE];
        let mut err_buf = vec![0u8; CHUNK_SIZE];

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf) => match read? {
                    0 => stdout = None,
                    n => self.bytes.extend_from_slice(&out_buf[..n]),
                },
                read = read_chunk(&mut stderr, &mut err_buf) => match read? {
                    0 => stderr = None,
                    n => {
                        self.stderr_seen = true;
                        self.bytes.extend_from_slice(&err_buf[..n]);
                    }
                },
            }
        }
        Ok(())
    }
}

// A closed stream never completes, so `select!` keeps polling the other one.
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_chunks_interleave_in_arrival_order() {
        let stdout = Builder::new()
            .read(b"extracting a\n")
            .wait(Duration::from_millis(60))
            .read(b"All OK\n")
            .build();
        let stderr = Builder::new()
            .wait(Duration::from_millis(30))
            .read(b"CRC failed in b\n")
            .build();

        let mut output = CombinedOutput::default();
        output.drain(stdout, stderr).await.unwrap();

        assert_eq!(output.bytes, b"extracting a\nCRC failed in b\nAll OK\n");
        assert!(output.stderr_seen);
    }

    #[tokio::test]
    async fn test_stdout_only_leaves_stderr_unseen() {
        let stdout = Builder::new().read(b"one\n").read(b"two\n").build();
        let stderr = Builder::new().build();

        let mut output = CombinedOutput::default();
        output.drain(stdout, stderr).await.unwrap();

        assert_eq!(output.bytes, b"one\ntwo\n");
        assert!(!output.stderr_seen);
    }

    #[tokio::test]
    async fn test_read_error_keeps_partial_output() {
        let stdout = Builder::new()
            .read(b"partial\n")
            .wait(Duration::from_millis(30))
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
            .build();
        let stderr = Builder::new().read(b"warning\n").build();

        let mut output = CombinedOutput::default();
        let err = output.drain(stdout, stderr).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        let text = String::from_utf8(output.bytes).unwrap();
        assert!(text.contains("partial\n"));
        assert!(text.contains("warning\n"));
    }
}
