//! Proxy id to viewer VM resolution.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::cache::ProxyCache;
use crate::collector::{ViewerCollector, ViewerData};
use crate::settings::ResolverConfig;

/// Where the VM behind a proxy id lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerLocation {
    pub proxy_id: String,
    /// Absent until the VM is ready.
    pub vm_address: Option<String>,
    pub project_id: Option<String>,
}

impl ViewerLocation {
    fn from_data(proxy_id: &str, data: ViewerData) -> Self {
        Self {
            proxy_id: proxy_id.to_string(),
            vm_address: data.vm_address,
            project_id: data.project_id,
        }
    }
}

/// Resolves proxy ids through the collector, waiting for launching VMs.
pub struct ViewerLocationResolver {
    collector: Arc<dyn ViewerCollector>,
    cache: Arc<ProxyCache>,
    poll_interval: Duration,
    max_polls: u32,
}

impl ViewerLocationResolver {
    pub fn new(
        collector: Arc<dyn ViewerCollector>,
        cache: Arc<ProxyCache>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            collector,
            cache,
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
        }
    }

    /// Upper bound on the time spent waiting after the first poll.
    pub fn retry_deadline(&self) -> Duration {
        self.poll_interval * self.max_polls.saturating_add(1)
    }

    /// Resolve `proxy_id`.
    ///
    /// Polls once, then every `poll_interval` up to `max_polls` more times while
    /// the collector reports no VM address. The returned location has no
    /// address if the VM never became ready.
    pub async fn resolve(&self, proxy_id: &str) -> ViewerLocation {
        if let Some(cached) = self.cache.location(proxy_id) {
            debug!("viewer location for {} served from cache", proxy_id);
            return cached;
        }

        let mut data = self.poll(proxy_id).await;

        if data.vm_address.is_none() && self.max_polls > 0 {
            let waiting = self.wait_for_address(proxy_id, data.clone());
            match tokio::time::timeout(self.retry_deadline(), waiting).await {
                Ok(latest) => data = latest,
                Err(_) => warn!(
                    "gave up waiting for viewer {} after {:?}",
                    proxy_id,
                    self.retry_deadline()
                ),
            }
        }

        let location = ViewerLocation::from_data(proxy_id, data);
        if location.vm_address.is_some() {
            self.cache.add_location(location.clone());
        }
        location
    }

    async fn wait_for_address(&self, proxy_id: &str, mut latest: ViewerData) -> ViewerData {
        for attempt in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let mut next = self.poll(proxy_id).await;
            if next.project_id.is_none() {
                next.project_id = latest.project_id.take();
            }
            latest = next;

            if latest.vm_address.is_some() {
                debug!("viewer {} ready after {} retries", proxy_id, attempt);
                break;
            }
        }
        latest
    }

    async fn poll(&self, proxy_id: &str) -> ViewerData {
        match self.collector.get_viewer_data(proxy_id).await {
            Ok(data) => data,
            Err(e) => {
                debug!("collector query for {} failed: {}", proxy_id, e);
                ViewerData::default()
            }
        }
    }
}
