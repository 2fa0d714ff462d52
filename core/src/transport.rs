//! The transport seam and its blocking `ureq` implementation.
//!
//! # Design
//! The dispatcher only knows `Transport::perform`. Connection handling, TLS,
//! proxying and response decoding all live behind it. `UreqTransport` is the
//! production implementation; tests substitute their own stubs.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use ureq::http::Response;
use ureq::{Agent, Body, Proxy, RequestBuilder};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes one HTTP attempt.
///
/// Implementations must report a per-attempt timeout as
/// `TransportError::Timeout`; that is the only error the dispatcher retries.
pub trait Transport: Send + Sync {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).perform(request)
    }
}

/// Blocking HTTP(S) transport with optional HTTP or SOCKS proxy.
///
/// Status codes are returned as data; only network-level problems are
/// errors. Bodies are read as raw bytes up to `TransportConfig::body_limit`.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    config: TransportConfig,
    agent: Agent,
}

impl UreqTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let agent = build_agent(&config, config.proxy.as_deref(), config.timeout())?;
        Ok(Self { config, agent })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The shared agent, or a one-off agent when the request overrides the
    /// proxy or timeout.
    fn agent_for(&self, request: &HttpRequest) -> Result<Agent, TransportError> {
        if request.proxy.is_none() && request.timeout.is_none() {
            return Ok(self.agent.clone());
        }
        let proxy = request.proxy.as_deref().or(self.config.proxy.as_deref());
        let timeout = request.timeout.or_else(|| self.config.timeout());
        build_agent(&self.config, proxy, timeout)
    }

    fn prepare<B>(&self, mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
        for (name, value) in self.config.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        let config = TransportConfig::default();
        let agent = agent_config(&config, None, config.timeout());
        Self { config, agent }
    }
}

impl Transport for UreqTransport {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent_for(request)?;
        let url = request.url.as_str();

        let result = match request.method {
            HttpMethod::Get => self.prepare(agent.get(url), request).call(),
            HttpMethod::Post => {
                let builder = self.prepare(agent.post(url), request);
                match &request.body {
                    Some(body) => builder.send(body.as_bytes()),
                    None => builder.send_empty(),
                }
            }
        };

        into_response(result.map_err(map_error)?, self.config.body_limit)
    }
}

fn build_agent(config: &TransportConfig, proxy: Option<&str>, timeout: Option<Duration>) -> Result<Agent, TransportError> {
    let proxy = proxy.map(parse_proxy).transpose()?;
    Ok(agent_config(config, proxy, timeout))
}

fn agent_config(config: &TransportConfig, proxy: Option<Proxy>, timeout: Option<Duration>) -> Agent {
    let mut builder = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(timeout)
        .proxy(proxy);
    if let Some(user_agent) = config.user_agent.as_deref() {
        builder = builder.user_agent(user_agent);
    }
    builder.build().new_agent()
}

fn parse_proxy(proxy: &str) -> Result<Proxy, TransportError> {
    Proxy::new(proxy).map_err(|e| TransportError::InvalidProxy {
        proxy: proxy.to_string(),
        reason: e.to_string(),
    })
}

fn into_response(mut response: Response<Body>, body_limit: u64) -> Result<HttpResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response
        .body_mut()
        .with_config()
        .limit(body_limit)
        .read_to_vec()
        .map_err(map_error)?;

    Ok(HttpResponse { status, headers, body })
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::Timeout,
        ureq::Error::Io(e) => TransportError::Io(e),
        ureq::Error::BadUri(msg) => TransportError::InvalidRequest(msg),
        ureq::Error::Http(e) => TransportError::InvalidRequest(e.to_string()),
        other => TransportError::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_proxy_scheme() {
        let config = TransportConfig {
            proxy: Some("ftp://127.0.0.1:21".into()),
            ..TransportConfig::default()
        };
        let err = UreqTransport::new(config).unwrap_err();
        assert!(matches!(err, TransportError::InvalidProxy { .. }));
    }

    #[test]
    fn accepts_socks_and_http_proxies() {
        for proxy in ["socks5://127.0.0.1:1080", "http://127.0.0.1:3128"] {
            let config = TransportConfig {
                proxy: Some(proxy.into()),
                ..TransportConfig::default()
            };
            assert!(UreqTransport::new(config).is_ok(), "{proxy}");
        }
    }

    #[test]
    fn per_request_proxy_is_validated() {
        let transport = UreqTransport::default();
        let request = HttpRequest::new(
            HttpMethod::Get,
            "http://127.0.0.1:9/",
            crate::http::RequestOptions::new().proxy("ftp://127.0.0.1:21"),
        );
        let err = transport.perform(&request).unwrap_err();
        assert!(matches!(err, TransportError::InvalidProxy { .. }));
    }

    #[test]
    fn ureq_timeouts_map_to_timeout() {
        let io = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        assert!(map_error(ureq::Error::Io(io)).is_timeout());

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(map_error(ureq::Error::Io(refused)), TransportError::Io(_)));
    }

    #[test]
    fn malformed_url_is_invalid_request() {
        let transport = UreqTransport::default();
        let request = HttpRequest::new(HttpMethod::Get, "not a url", Default::default());
        let err = transport.perform(&request).unwrap_err();
        assert!(!err.is_timeout());
    }
}
