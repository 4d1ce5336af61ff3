use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Serialize;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::UnixStream,
};

use crate::{SandcoreError, SandcoreResult};

use super::{encode_request, read_response, Fault, RawResponse, Verb};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long a single control call may take by default.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A client for the control API a sandbox process serves on a Unix socket.
///
/// Calls take `&mut self`, so requests on one channel are strictly sequential. The underlying
/// connection is reused between calls and reopened once if the peer closed it.
#[derive(Debug)]
pub struct ControlChannel {
    endpoint: PathBuf,
    stream: Option<BufReader<UnixStream>>,
    call_timeout: Duration,
}

/// A decoded control response.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponse {
    /// The status code.
    pub status: u16,

    /// The decoded JSON body, `null` when empty.
    pub body: serde_json::Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ControlChannel {
    /// Polls `endpoint` until it accepts a connection, up to `max_attempts` times with
    /// `retry_interval` between attempts.
    pub async fn connect(
        endpoint: impl AsRef<Path>,
        max_attempts: u32,
        retry_interval: Duration,
    ) -> SandcoreResult<Self> {
        let endpoint = endpoint.as_ref().to_path_buf();

        for attempt in 1..=max_attempts {
            if endpoint.exists() {
                match UnixStream::connect(&endpoint).await {
                    Ok(stream) => {
                        tracing::debug!(
                            "connected to control endpoint {} after {} attempt(s)",
                            endpoint.display(),
                            attempt
                        );
                        return Ok(Self {
                            endpoint,
                            stream: Some(BufReader::new(stream)),
                            call_timeout: DEFAULT_CALL_TIMEOUT,
                        });
                    }
                    Err(e) => {
                        tracing::trace!("control endpoint {} refused: {}", endpoint.display(), e)
                    }
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(retry_interval).await;
            }
        }

        Err(SandcoreError::ControlChannelUnavailable {
            endpoint,
            attempts: max_attempts,
        })
    }

    /// Sets the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The socket path.
    pub fn get_endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Sends one request and reads its full response, whatever the status.
    pub async fn call<B>(
        &mut self,
        verb: Verb,
        path: &str,
        body: Option<&B>,
    ) -> SandcoreResult<ControlResponse>
    where
        B: Serialize + ?Sized,
    {
        let payload = body.map(serde_json::to_vec).transpose()?;
        let request = encode_request(verb, path, payload.as_deref());

        let timeout = self.call_timeout;
        let exchanged = tokio::time::timeout(timeout, self.exchange(&request)).await;
        let raw = match exchanged {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.stream = None;
                return Err(e);
            }
            Err(_) => {
                self.stream = None;
                return Err(SandcoreError::ControlTimeout {
                    verb,
                    path: path.to_string(),
                    timeout,
                });
            }
        };

        if raw.closes_connection() {
            self.stream = None;
        }

        tracing::debug!("{} {} -> {}", verb, path, raw.status);

        let body = if raw.is_success() {
            raw.json()?
        } else {
            serde_json::json!({ "fault_message": Fault::from_body(&raw.body) })
        };

        Ok(ControlResponse {
            status: raw.status,
            body,
        })
    }

    /// Issues a `PUT`, mapping any non-2xx status to [`SandcoreError::ControlApi`].
    pub async fn put<B>(&mut self, path: &str, body: &B) -> SandcoreResult<ControlResponse>
    where
        B: Serialize + ?Sized,
    {
        let response = self.call(Verb::Put, path, Some(body)).await?;
        if !(200..300).contains(&response.status) {
            return Err(SandcoreError::ControlApi {
                verb: Verb::Put,
                path: path.to_string(),
                status: response.status,
                fault: response.fault_message().unwrap_or_default().to_string(),
            });
        }

        Ok(response)
    }

    /// Drops the connection. The next call reconnects once or fails.
    pub fn close(&mut self) {
        self.stream = None;
    }

    async fn exchange(&mut self, request: &[u8]) -> SandcoreResult<RawResponse> {
        if self.stream.is_none() {
            // One attempt only: a vanished endpoint means the process is gone.
            if !self.endpoint.exists() {
                return Err(SandcoreError::ControlChannelUnavailable {
                    endpoint: self.endpoint.clone(),
                    attempts: 1,
                });
            }

            let stream = UnixStream::connect(&self.endpoint)
                .await
                .map_err(SandcoreError::ControlTransport)?;
            self.stream = Some(BufReader::new(stream));
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(SandcoreError::ControlTransport(io::ErrorKind::NotConnected.into()));
        };

        stream
            .get_mut()
            .write_all(request)
            .await
            .map_err(SandcoreError::ControlTransport)?;

        read_response(stream).await
    }
}

impl ControlResponse {
    /// The `fault_message` of an error response.
    pub fn fault_message(&self) -> Option<&str> {
        self.body.get("fault_message").and_then(|v| v.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
