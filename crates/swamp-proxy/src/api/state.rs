//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::Result;

use crate::auth::AuthState;
use crate::collector::ViewerCollector;
use crate::directory::ProjectDirectory;
use crate::proxy::ProxyEndpoint;
use crate::settings::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub collector: Arc<dyn ViewerCollector>,
    pub proxy: Arc<ProxyEndpoint>,
    /// Largest inbound body relayed to a viewer.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        collector: Arc<dyn ViewerCollector>,
        directory: Arc<dyn ProjectDirectory>,
    ) -> Result<Self> {
        let proxy = ProxyEndpoint::new(collector.clone(), directory, config)?;
        Ok(Self {
            auth: AuthState::new(config.auth.clone()),
            collector,
            proxy: Arc::new(proxy),
            max_body_bytes: config.upstream.max_body_bytes,
        })
    }
}
