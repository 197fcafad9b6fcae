//! Default [`HttpTransport`] built on ureq.

use std::io::{self, Read};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::https::{
    DEFAULT_TIMEOUT, HttpBody, HttpRequest, HttpResponse, HttpTransport, TransportError,
};

/// Blocking transport over a shared ureq agent.
///
/// The timeout bounds connecting and each individual socket read or write,
/// never the whole exchange, so a slow body can be streamed for as long as
/// data keeps arriving.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    timeout: Duration,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            timeout,
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .build()
}

fn io_error(e: &io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            TransportError::TimedOut(e.to_string())
        }
        _ => TransportError::Io(e.to_string()),
    }
}

fn transport_error(e: &ureq::Transport) -> TransportError {
    let io = std::error::Error::source(e).and_then(|s| s.downcast_ref::<io::Error>());
    if let Some(io) = io {
        if matches!(io.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
            return TransportError::TimedOut(e.to_string());
        }
    }
    match e.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
            TransportError::Connect(e.to_string())
        }
        _ => TransportError::Io(e.to_string()),
    }
}

struct UreqBody {
    reader: Box<dyn Read + Send + Sync + 'static>,
}

impl HttpBody for UreqBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reader.read(buf).map_err(|e| io_error(&e))
    }
}

impl HttpTransport for UreqTransport {
    fn get(
        &mut self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        if timeout != self.timeout {
            self.agent = build_agent(timeout);
            self.timeout = timeout;
        }
        let mut req = self.agent.get(&request.url);
        if let Some(creds) = &request.credentials {
            let token = STANDARD.encode(format!("{}:{}", creds.user, creds.password));
            req = req.set("Authorization", &format!("Basic {token}"));
        }

        // ureq reports non-2xx as an error but still hands back the response.
        let response = match req.call() {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(t)) => return Err(transport_error(&t)),
        };

        let status = response.status();
        let content_length = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        Ok(HttpResponse {
            status,
            content_length,
            body: Box::new(UreqBody {
                reader: response.into_reader(),
            }),
        })
    }
}
