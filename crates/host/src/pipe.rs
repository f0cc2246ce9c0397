//! In-memory stdio plumbing between the host and one WASI guest.
//!
//! Each session gets three byte channels.  The host keeps plain
//! `DuplexStream` ends (write stdin, read stdout/stderr); the guest ends are
//! wrapped in the wasmtime-wasi stream adapters the WASI context builder
//! accepts.  Writers block once a channel's capacity is full, which bounds
//! memory the same way an OS pipe would.

use tokio::io::{AsyncReadExt, DuplexStream};
use wasmtime_wasi::pipe::{AsyncReadStream, AsyncWriteStream};
use wasmtime_wasi::{AsyncStdinStream, AsyncStdoutStream};

const PIPE_CAPACITY: usize = 256 * 1024;

/// Host-side ends of the guest's stdio.
pub(crate) struct HostStdio {
    pub stdin: DuplexStream,
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
}

/// Guest-side ends, in the form `WasiCtxBuilder` accepts.
pub(crate) struct GuestStdio {
    pub stdin: AsyncStdinStream,
    pub stdout: AsyncStdoutStream,
    pub stderr: AsyncStdoutStream,
}

/// Provision the three stdio channels.  Must run inside a tokio runtime:
/// the wasmtime-wasi adapters spawn their pump tasks on it.
pub(crate) fn stdio_pair() -> (HostStdio, GuestStdio) {
    let (stdin_host, stdin_guest) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdout_host, stdout_guest) = tokio::io::duplex(PIPE_CAPACITY);
    let (stderr_host, stderr_guest) = tokio::io::duplex(PIPE_CAPACITY);
    let host = HostStdio {
        stdin: stdin_host,
        stdout: stdout_host,
        stderr: stderr_host,
    };
    let guest = GuestStdio {
        stdin: AsyncStdinStream::new(AsyncReadStream::new(stdin_guest)),
        stdout: AsyncStdoutStream::new(AsyncWriteStream::new(PIPE_CAPACITY, stdout_guest)),
        stderr: AsyncStdoutStream::new(AsyncWriteStream::new(PIPE_CAPACITY, stderr_guest)),
    };
    (host, guest)
}

/// Pull whatever bytes are already buffered on a stream, without waiting.
pub(crate) async fn drain_now(stream: &mut DuplexStream) -> Vec<u8> {
    use futures::FutureExt;
    // Let the guest-side pump tasks flush anything in flight first.
    tokio::task::yield_now().await;
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).now_or_never() {
            Some(Ok(n)) if n > 0 => out.extend_from_slice(&buf[..n]),
            _ => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn drain_now_returns_only_buffered_bytes() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(b"stderr so far").await.expect("write");
        assert_eq!(drain_now(&mut rx).await, b"stderr so far");
        // Nothing new buffered: drain returns immediately with no data.
        assert!(drain_now(&mut rx).await.is_empty());
    }
}
