//! Forwards JSON-over-HTTP calls from a context that cannot originate
//! outbound requests directly to a cooperating auxiliary context that can.
//!
//! There is no real process boundary in this workspace, but the contract
//! from the spec is preserved structurally: only [`AdapterHandle`] (the
//! "auxiliary") ever touches [`reqwest`]; [`NetworkAdapter`] (the
//! "background" side) only ever talks to it through [`NetworkAdapter::call`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{FutureExt, Shared};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub struct CallEnvelope {
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
}

impl CallEnvelope {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), method: HttpMethod::Get, body: None }
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self { endpoint: endpoint.into(), method: HttpMethod::Post, body: Some(body) }
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), method: HttpMethod::Delete, body: None }
    }
}

#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("network adapter auxiliary context could not be brought up")]
    AdapterUnavailable,
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned non-2xx status {status}: {error_text}")]
    Upstream { status: u16, error_text: String },
}

/// A live handle to the auxiliary context. Cheap to clone.
#[derive(Clone)]
pub struct AdapterHandle {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl AdapterHandle {
    async fn call(&self, envelope: CallEnvelope, call_timeout: Duration) -> Result<Value, AdapterError> {
        let url = format!("{}{}", self.base_url, envelope.endpoint);
        let request = match envelope.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        let request = match &envelope.body {
            Some(body) => request.json(body),
            None => request,
        };

        let response = tokio::time::timeout(call_timeout, request.send())
            .await
            .map_err(|_| AdapterError::Timeout)?
            .map_err(|_| AdapterError::AdapterUnavailable)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Upstream { status: status.as_u16(), error_text });
        }
        tokio::time::timeout(call_timeout, response.json::<Value>())
            .await
            .map_err(|_| AdapterError::Timeout)?
            .map_err(|_| AdapterError::Upstream { status: status.as_u16(), error_text: "invalid json body".into() })
    }
}

type SetupFuture = Shared<Pin<Box<dyn Future<Output = Result<AdapterHandle, AdapterError>> + Send>>>;

/// The background-context half of the split. At most one [`AdapterHandle`]
/// exists per adapter; setup is idempotent and shared across concurrent callers.
pub struct NetworkAdapter {
    base_url: Arc<str>,
    ready_timeout: Duration,
    call_timeout: Duration,
    setup: Mutex<Option<SetupFuture>>,
    handle: RwLock<Option<AdapterHandle>>,
}

impl NetworkAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().into(),
            ready_timeout: READY_TIMEOUT,
            call_timeout: CALL_TIMEOUT,
            setup: Mutex::new(None),
            handle: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_timeouts(base_url: impl Into<String>, ready_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().into(),
            ready_timeout,
            call_timeout,
            setup: Mutex::new(None),
            handle: RwLock::new(None),
        }
    }

    /// Forces the adapter to treat its current handle (if any) as stale,
    /// so the next call re-runs the readiness handshake.
    pub async fn reinitialize(&self) {
        *self.handle.write().await = None;
        *self.setup.lock().await = None;
    }

    /// Sends a liveness probe; clears the cached handle on failure so the
    /// next call recreates the auxiliary context.
    pub async fn ping(&self) -> bool {
        match self.call(CallEnvelope::get("/health")).await {
            Ok(_) => true,
            Err(_) => {
                *self.handle.write().await = None;
                false
            }
        }
    }

    pub async fn call(&self, envelope: CallEnvelope) -> Result<Value, AdapterError> {
        let handle = self.ensure_ready().await?;
        handle.call(envelope, self.call_timeout).await
    }

    async fn ensure_ready(&self) -> Result<AdapterHandle, AdapterError> {
        if let Some(handle) = self.handle.read().await.clone() {
            return Ok(handle);
        }

        let fut = {
            let mut setup_guard = self.setup.lock().await;
            match setup_guard.clone() {
                Some(fut) => fut,
                None => {
                    let base_url = self.base_url.clone();
                    let ready_timeout = self.ready_timeout;
                    let boxed: Pin<Box<dyn Future<Output = Result<AdapterHandle, AdapterError>> + Send>> =
                        Box::pin(async move { bring_up_auxiliary(base_url, ready_timeout).await });
                    let shared = boxed.shared();
                    *setup_guard = Some(shared.clone());
                    shared
                }
            }
        };

        let result = fut.await;
        // Settlement clears the pending slot regardless of outcome, so a
        // failed setup can be retried by the next caller.
        *self.setup.lock().await = None;
        if let Ok(handle) = &result {
            *self.handle.write().await = Some(handle.clone());
        } else {
            tracing::warn!(base_url = %self.base_url, "network adapter auxiliary context failed to come up");
        }
        result
    }
}

async fn bring_up_auxiliary(base_url: Arc<str>, ready_timeout: Duration) -> Result<AdapterHandle, AdapterError> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|_| AdapterError::AdapterUnavailable)?;
    let handle = AdapterHandle { client, base_url: base_url.clone() };

    let health_url = format!("{base_url}/health");
    let ready = tokio::time::timeout(ready_timeout, handle.client.get(&health_url).send()).await;
    match ready {
        Ok(Ok(response)) if response.status().is_success() => {
            tracing::debug!(base_url = %base_url, "network adapter auxiliary context ready");
            Ok(handle)
        }
        _ => Err(AdapterError::AdapterUnavailable),
    }
}
