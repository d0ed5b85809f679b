use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::Instant;
use crate::error::ControlChannelError;

const READ_CHUNK: usize = 4096;

/// One-shot HTTP/1.1 GET over a Unix domain socket.
///
/// Every query opens its own connection and reads until the peer closes or
/// the read deadline passes, whichever comes first. `Content-Length` is never
/// consulted, so chunked or unterminated bodies come back as-is.
#[derive(Debug, Clone)]
pub struct ControlSocketClient {
    socket_path: PathBuf,
    read_timeout: Duration,
}

impl ControlSocketClient {
    pub fn new(socket_path: impl Into<PathBuf>, read_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            read_timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send `GET path` and return every byte received before close or deadline
    pub async fn query(&self, path: &str) -> Result<Vec<u8>, ControlChannelError> {
        let mut stream = tokio::time::timeout(self.read_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| ControlChannelError::ConnectTimeout {
                path: self.socket_path.clone(),
                timeout: self.read_timeout,
            })?
            .map_err(|source| ControlChannelError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        let deadline = Instant::now() + self.read_timeout;
        tokio::time::timeout_at(deadline, stream.write_all(build_request(path).as_bytes()))
            .await
            .map_err(|_| ControlChannelError::WriteTimeout(self.read_timeout))?
            .map_err(ControlChannelError::Write)?;

        let mut response = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(ControlChannelError::Read(e)),
                Err(_) => {
                    tracing::debug!(
                        path,
                        received = response.len(),
                        "Control socket read deadline reached"
                    );
                    break;
                }
            }
        }

        Ok(response)
    }

    /// Like [`query`](Self::query) but decoded as UTF-8
    pub async fn query_text(&self, path: &str) -> Result<String, ControlChannelError> {
        let bytes = self.query(path).await?;
        Ok(String::from_utf8(bytes)?)
    }
}

fn build_request(path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    )
}
