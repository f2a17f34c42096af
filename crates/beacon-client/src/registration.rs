//! Instance registration and heartbeat
//!
//! Registers an instance on startup, renews its lease on the renewal
//! interval, and cancels on shutdown. A renew the node does not recognize
//! (lease evicted while we were partitioned, or node restarted empty)
//! triggers an immediate re-register rather than an error.

use crate::api::{RegistryApi, RenewOutcome};
use crate::error::ClientResult;
use beacon_core::TimeProvider;
use beacon_registry::{InstanceIdentity, InstanceStatus, RegisterRequest};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct InstanceRegistration {
    api: Arc<dyn RegistryApi>,
    time: Arc<dyn TimeProvider>,
    identity: InstanceIdentity,
    renewal_interval_ms: u64,
    /// Lease duration requested at registration; None takes the node
    /// default
    duration_ms: Option<u64>,
}

impl InstanceRegistration {
    pub fn new(
        api: Arc<dyn RegistryApi>,
        time: Arc<dyn TimeProvider>,
        identity: InstanceIdentity,
        renewal_interval_ms: u64,
        duration_ms: Option<u64>,
    ) -> Self {
        Self {
            api,
            time,
            identity,
            renewal_interval_ms,
            duration_ms,
        }
    }

    /// Register once; surfacing the error lets the caller decide whether
    /// to retry or abort startup
    pub async fn register(&self) -> ClientResult<()> {
        let request = RegisterRequest {
            identity: self.identity.clone(),
            status: InstanceStatus::Up,
            duration_ms: self.duration_ms,
            registered_at_ms: None,
            last_renewal_ms: None,
        };
        self.api.register(&request).await?;
        info!(
            app = %self.identity.app_name,
            instance = %self.identity.instance_id,
            "registered with registry"
        );
        Ok(())
    }

    /// One heartbeat: renew, re-registering when the node lost the lease
    pub async fn heartbeat_once(&self) {
        match self
            .api
            .renew(&self.identity.app_name, &self.identity.instance_id)
            .await
        {
            Ok(RenewOutcome::Renewed) => {}
            Ok(RenewOutcome::Unknown) => {
                warn!(
                    app = %self.identity.app_name,
                    instance = %self.identity.instance_id,
                    "registry lost our lease, re-registering"
                );
                if let Err(error) = self.register().await {
                    warn!(%error, "re-registration failed, will retry next heartbeat");
                }
            }
            Err(error) => {
                // the lease survives missed renewals until it expires
                warn!(%error, "renewal failed, will retry next heartbeat");
            }
        }
    }

    /// Register, then heartbeat until shutdown fires, then cancel
    pub fn start(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(error) = self.register().await {
                warn!(%error, "initial registration failed, will retry on heartbeat");
            }
            loop {
                tokio::select! {
                    _ = self.time.sleep_ms(self.renewal_interval_ms) => {
                        self.heartbeat_once().await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
            match self
                .api
                .cancel(&self.identity.app_name, &self.identity.instance_id)
                .await
            {
                Ok(()) => info!(
                    app = %self.identity.app_name,
                    instance = %self.identity.instance_id,
                    "deregistered from registry"
                ),
                Err(error) => warn!(%error, "deregistration failed, lease will expire"),
            }
        })
    }
}
