//! Registry API seam
//!
//! Everything the client library asks of a registry node goes through
//! [`RegistryApi`], so the cache refresher and the registration loop can
//! be tested against an in-memory registry instead of a live server.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use beacon_registry::{
    AppName, DeltaResponse, FullRegistryResponse, InstanceId, RegisterRequest,
};
use std::fmt::Debug;

/// Outcome of a delta fetch
#[derive(Debug)]
pub enum DeltaFetch {
    /// Deltas since the requested version
    Deltas(DeltaResponse),
    /// The requested version has aged out of the node's delta queue;
    /// the caller must fall back to a full fetch
    Gone,
}

/// Outcome of a renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The node has no lease for this instance; the caller must
    /// re-register
    Unknown,
}

/// Client-side view of one registry node's HTTP surface
#[async_trait]
pub trait RegistryApi: Send + Sync + Debug {
    async fn fetch_full(&self) -> ClientResult<FullRegistryResponse>;

    async fn fetch_delta(&self, since_version: u64) -> ClientResult<DeltaFetch>;

    async fn register(&self, request: &RegisterRequest) -> ClientResult<()>;

    async fn renew(&self, app: &AppName, instance: &InstanceId) -> ClientResult<RenewOutcome>;

    async fn cancel(&self, app: &AppName, instance: &InstanceId) -> ClientResult<()>;
}

/// HTTP implementation against a single registry node
#[derive(Debug)]
pub struct HttpRegistryApi {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRegistryApi {
    /// `endpoint` is the node's base URL, e.g. "http://registry-1:8761"
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    fn rejected(&self, status: reqwest::StatusCode) -> ClientError {
        ClientError::Rejected {
            endpoint: self.endpoint.clone(),
            status: status.as_u16(),
        }
    }

    fn unreachable(&self, error: reqwest::Error) -> ClientError {
        ClientError::unreachable(&self.endpoint, error.to_string())
    }

    fn undecodable(&self, error: reqwest::Error) -> ClientError {
        ClientError::InvalidResponse {
            endpoint: self.endpoint.clone(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn fetch_full(&self) -> ClientResult<FullRegistryResponse> {
        let url = format!("{}/registry/apps", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(self.rejected(response.status()));
        }
        response.json().await.map_err(|e| self.undecodable(e))
    }

    async fn fetch_delta(&self, since_version: u64) -> ClientResult<DeltaFetch> {
        let url = format!("{}/registry/delta?since={}", self.endpoint, since_version);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if response.status() == reqwest::StatusCode::GONE {
            return Ok(DeltaFetch::Gone);
        }
        if !response.status().is_success() {
            return Err(self.rejected(response.status()));
        }
        let deltas = response.json().await.map_err(|e| self.undecodable(e))?;
        Ok(DeltaFetch::Deltas(deltas))
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<()> {
        let url = format!(
            "{}/registry/apps/{}",
            self.endpoint, request.identity.app_name
        );
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(self.rejected(response.status()));
        }
        Ok(())
    }

    async fn renew(&self, app: &AppName, instance: &InstanceId) -> ClientResult<RenewOutcome> {
        let url = format!("{}/registry/apps/{}/{}/renew", self.endpoint, app, instance);
        let response = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(RenewOutcome::Unknown);
        }
        if !response.status().is_success() {
            return Err(self.rejected(response.status()));
        }
        Ok(RenewOutcome::Renewed)
    }

    async fn cancel(&self, app: &AppName, instance: &InstanceId) -> ClientResult<()> {
        let url = format!("{}/registry/apps/{}/{}", self.endpoint, app, instance);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(self.rejected(response.status()));
        }
        Ok(())
    }
}
