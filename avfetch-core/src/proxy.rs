use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::ProxySection;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy api request failed: {0}")]
    Request(String),
    #[error("proxy api returned malformed payload: {0}")]
    Payload(String),
    #[error("proxy api refused with status {0}")]
    Refused(i64),
    #[error("proxy api still failing after {0} attempts")]
    Exhausted(usize),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

/// A proxy endpoint bounded by its issue time. Valid only while its age is
/// below the configured TTL; an expired lease must be replaced, never used.
#[derive(Debug, Clone)]
pub struct ProxyLease {
    endpoint: String,
    issued_at: Instant,
}

impl ProxyLease {
    fn issue(endpoint: String) -> Self {
        Self {
            endpoint,
            issued_at: Instant::now(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

#[async_trait]
pub trait LeaseSource: Send + Sync {
    /// One fetch attempt against the issuing service.
    async fn fetch(&self) -> ProxyResult<String>;
}

/// Issuing-service payload: `{"ret": 200, "data": [{"ip": ..., "port": ...}]}`.
#[derive(Debug, Deserialize)]
struct IssueResponse {
    ret: i64,
    #[serde(default)]
    data: Vec<IssuedEndpoint>,
}

#[derive(Debug, Deserialize)]
struct IssuedEndpoint {
    ip: String,
    port: PortField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u32),
    Text(String),
}

impl fmt::Display for PortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortField::Number(port) => write!(f, "{port}"),
            PortField::Text(port) => write!(f, "{port}"),
        }
    }
}

pub struct HttpLeaseSource {
    client: reqwest::Client,
    api_url: String,
}

impl HttpLeaseSource {
    pub fn new(api_url: impl Into<String>) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("avfetch/0.1")
            .build()
            .map_err(|err| ProxyError::Request(err.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl LeaseSource for HttpLeaseSource {
    async fn fetch(&self) -> ProxyResult<String> {
        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|err| ProxyError::Request(err.to_string()))?;
        let payload: IssueResponse = response
            .json()
            .await
            .map_err(|err| ProxyError::Payload(err.to_string()))?;
        if payload.ret != 200 {
            return Err(ProxyError::Refused(payload.ret));
        }
        let endpoint = payload
            .data
            .first()
            .ok_or_else(|| ProxyError::Payload("response carries no endpoints".into()))?;
        Ok(format!("http://{}:{}", endpoint.ip, endpoint.port))
    }
}

/// Obtains and time-bounds proxy leases. Acquisition retries up to the
/// configured bound; exhaustion is fatal for the batch, since no work can
/// proceed without a proxy.
pub struct ProxyManager {
    source: Arc<dyn LeaseSource>,
    ttl: Duration,
    max_attempts: usize,
    retry_delay: Duration,
}

impl ProxyManager {
    pub fn new(config: &ProxySection) -> ProxyResult<Self> {
        let source = Arc::new(HttpLeaseSource::new(config.api_url.clone())?);
        Ok(Self::with_source(config, source))
    }

    pub fn with_source(config: &ProxySection, source: Arc<dyn LeaseSource>) -> Self {
        Self {
            source,
            ttl: Duration::from_secs(config.lease_ttl_seconds),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        }
    }

    pub async fn acquire(&self) -> ProxyResult<ProxyLease> {
        for attempt in 1..=self.max_attempts {
            match self.source.fetch().await {
                Ok(endpoint) => {
                    info!(endpoint = %endpoint, attempt, "acquired proxy lease");
                    return Ok(ProxyLease::issue(endpoint));
                }
                Err(err) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %err, "proxy fetch failed");
                    if attempt < self.max_attempts {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(ProxyError::Exhausted(self.max_attempts))
    }

    /// Returns `lease` unchanged while it is still inside the TTL, otherwise
    /// acquires a replacement. Called before every work item; expiry is
    /// relative to issue time, not item count.
    pub async fn ensure_valid(&self, lease: Option<ProxyLease>) -> ProxyResult<ProxyLease> {
        match lease {
            Some(lease) if !lease.is_expired(self.ttl) => Ok(lease),
            Some(lease) => {
                info!(age_secs = lease.age().as_secs(), "proxy lease expired, replacing");
                self.acquire().await
            }
            None => {
                info!("no proxy lease yet, acquiring");
                self.acquire().await
            }
        }
    }
}
