//! Cache refresher
//!
//! Background loop keeping a [`ClientCache`] close to the registry: a
//! full fetch to seed the view, then delta polls on a fixed interval,
//! falling back to a full fetch when the node signals the delta window
//! has passed us by or the delta poll itself fails. Only when the full
//! fetch fails too does the previous view stay in place.

use crate::api::{DeltaFetch, RegistryApi};
use crate::cache::ClientCache;
use beacon_core::TimeProvider;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct CacheRefresher {
    cache: Arc<ClientCache>,
    api: Arc<dyn RegistryApi>,
    time: Arc<dyn TimeProvider>,
    refresh_interval_ms: u64,
}

impl CacheRefresher {
    pub fn new(
        cache: Arc<ClientCache>,
        api: Arc<dyn RegistryApi>,
        time: Arc<dyn TimeProvider>,
        refresh_interval_ms: u64,
    ) -> Self {
        Self {
            cache,
            api,
            time,
            refresh_interval_ms,
        }
    }

    /// Run the poll loop until shutdown fires
    pub fn start(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_ms = self.refresh_interval_ms,
                "cache refresher started"
            );
            loop {
                tokio::select! {
                    _ = self.time.sleep_ms(self.refresh_interval_ms) => {
                        self.refresh_once().await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
            info!("cache refresher stopped");
        })
    }

    /// One poll: delta when the cache has a version, full otherwise, on a
    /// gone signal, or when the delta poll fails. The stale view is kept
    /// only when the full fetch fails too.
    pub async fn refresh_once(&self) {
        let since = self.cache.version();
        if since == 0 {
            self.full_fetch().await;
            return;
        }

        match self.api.fetch_delta(since).await {
            Ok(DeltaFetch::Deltas(response)) => {
                let now_ms = self.time.now_ms();
                self.cache
                    .apply_deltas(&response.deltas, response.version, now_ms);
            }
            Ok(DeltaFetch::Gone) => {
                debug!(since, "delta window expired, falling back to full fetch");
                self.full_fetch().await;
            }
            Err(error) => {
                warn!(%error, "delta poll failed, falling back to full fetch");
                self.full_fetch().await;
            }
        }
    }

    async fn full_fetch(&self) {
        match self.api.fetch_full().await {
            Ok(registry) => {
                let now_ms = self.time.now_ms();
                self.cache.apply_full(registry, now_ms);
            }
            Err(error) => {
                warn!(%error, "full fetch failed, serving stale view");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RenewOutcome;
    use crate::error::{ClientError, ClientResult};
    use async_trait::async_trait;
    use beacon_core::MockClock;
    use beacon_registry::{
        AppName, DeltaAction, DeltaEntry, DeltaResponse, FullRegistryResponse, InstanceId,
        InstanceIdentity, InstanceStatus, Lease, RegisterRequest,
    };
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    fn test_lease(instance: &str) -> Lease {
        let identity = InstanceIdentity {
            instance_id: InstanceId::new(instance).unwrap(),
            app_name: AppName::new("orders").unwrap(),
            hostname: "host-1".into(),
            ip_addr: "10.0.0.1".into(),
            port: 8080,
            secure_port: None,
            metadata: HashMap::new(),
        };
        Lease::new(identity, InstanceStatus::Up, 90_000, 1000)
    }

    /// Scripted registry: serves a fixed full view and a queue of delta
    /// responses
    #[derive(Debug, Default)]
    struct ScriptedApi {
        full: Mutex<Option<FullRegistryResponse>>,
        deltas: Mutex<Vec<ClientResult<DeltaFetch>>>,
        full_fetches: Mutex<u32>,
    }

    impl ScriptedApi {
        fn set_full(&self, response: FullRegistryResponse) {
            *self.full.lock().unwrap() = Some(response);
        }

        fn push_delta(&self, result: ClientResult<DeltaFetch>) {
            self.deltas.lock().unwrap().push(result);
        }

        fn fail_full(&self) {
            *self.full.lock().unwrap() = None;
        }

        fn full_fetches(&self) -> u32 {
            *self.full_fetches.lock().unwrap()
        }
    }

    #[async_trait]
    impl RegistryApi for ScriptedApi {
        async fn fetch_full(&self) -> ClientResult<FullRegistryResponse> {
            *self.full_fetches.lock().unwrap() += 1;
            self.full
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ClientError::unreachable("scripted", "no full view"))
        }

        async fn fetch_delta(&self, since_version: u64) -> ClientResult<DeltaFetch> {
            let mut deltas = self.deltas.lock().unwrap();
            if deltas.is_empty() {
                Ok(DeltaFetch::Deltas(DeltaResponse {
                    deltas: vec![],
                    version: since_version,
                }))
            } else {
                deltas.remove(0)
            }
        }

        async fn register(&self, _request: &RegisterRequest) -> ClientResult<()> {
            Ok(())
        }

        async fn renew(
            &self,
            _app: &AppName,
            _instance: &InstanceId,
        ) -> ClientResult<RenewOutcome> {
            Ok(RenewOutcome::Renewed)
        }

        async fn cancel(&self, _app: &AppName, _instance: &InstanceId) -> ClientResult<()> {
            Ok(())
        }
    }

    fn full_view(version: u64) -> FullRegistryResponse {
        let mut applications = BTreeMap::new();
        applications.insert(AppName::new("orders").unwrap(), vec![test_lease("host-1:8080")]);
        FullRegistryResponse {
            applications,
            version,
        }
    }

    fn refresher(api: Arc<ScriptedApi>) -> (CacheRefresher, Arc<ClientCache>) {
        let cache = Arc::new(ClientCache::new());
        let refresher = CacheRefresher::new(
            cache.clone(),
            api,
            Arc::new(MockClock::new(1_000_000)),
            30_000,
        );
        (refresher, cache)
    }

    #[tokio::test]
    async fn test_first_refresh_is_full_fetch() {
        let api = Arc::new(ScriptedApi::default());
        api.set_full(full_view(4));
        let (refresher, cache) = refresher(api.clone());

        refresher.refresh_once().await;

        assert_eq!(api.full_fetches(), 1);
        assert_eq!(cache.version(), 4);
        assert_eq!(
            cache.instances_of(&AppName::new("orders").unwrap()).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_subsequent_refreshes_poll_deltas() {
        let api = Arc::new(ScriptedApi::default());
        api.set_full(full_view(4));
        api.push_delta(Ok(DeltaFetch::Deltas(DeltaResponse {
            deltas: vec![DeltaEntry {
                action: DeltaAction::Add,
                lease: test_lease("host-2:8080"),
                version: 5,
                timestamp_ms: 2000,
            }],
            version: 5,
        })));
        let (refresher, cache) = refresher(api.clone());

        refresher.refresh_once().await;
        refresher.refresh_once().await;

        assert_eq!(api.full_fetches(), 1);
        assert_eq!(cache.version(), 5);
        assert_eq!(
            cache.instances_of(&AppName::new("orders").unwrap()).len(),
            2
        );
    }

    #[tokio::test]
    async fn test_gone_falls_back_to_full_fetch() {
        let api = Arc::new(ScriptedApi::default());
        api.set_full(full_view(4));
        api.push_delta(Ok(DeltaFetch::Gone));
        let (refresher, cache) = refresher(api.clone());

        refresher.refresh_once().await;
        api.set_full(full_view(40));
        refresher.refresh_once().await;

        assert_eq!(api.full_fetches(), 2);
        assert_eq!(cache.version(), 40);
    }

    #[tokio::test]
    async fn test_failed_delta_poll_falls_back_to_full_fetch() {
        let api = Arc::new(ScriptedApi::default());
        api.set_full(full_view(4));
        api.push_delta(Err(ClientError::unreachable("scripted", "down")));
        let (refresher, cache) = refresher(api.clone());

        refresher.refresh_once().await;
        assert_eq!(api.full_fetches(), 1);

        // the registry has moved on while delta polls were failing; the
        // fallback full fetch picks the new view up
        api.set_full(full_view(9));
        refresher.refresh_once().await;

        assert_eq!(api.full_fetches(), 2);
        assert_eq!(cache.version(), 9);
    }

    #[tokio::test]
    async fn test_stale_view_kept_when_full_fetch_also_fails() {
        let api = Arc::new(ScriptedApi::default());
        api.set_full(full_view(4));
        api.push_delta(Err(ClientError::unreachable("scripted", "down")));
        let (refresher, cache) = refresher(api.clone());

        refresher.refresh_once().await;
        api.fail_full();
        refresher.refresh_once().await;

        // registry fully unreachable: the stale view still answers reads
        assert_eq!(cache.version(), 4);
        assert_eq!(
            cache.instances_of(&AppName::new("orders").unwrap()).len(),
            1
        );
    }
}
