//! The proxied request pipeline.
//!
//! resolve location -> validate project -> authorize -> cache lookup (GET)
//! -> forward -> rewrite and optionally cache.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, Response, header};
use log::{debug, warn};

use super::cache::ProxyCache;
use super::error::ProxyError;
use super::forwarder::{ProxyRequest, RequestForwarder};
use super::guard::AccessGuard;
use super::resolver::ViewerLocationResolver;
use super::response_cache::ResponseCache;
use crate::collector::ViewerCollector;
use crate::directory::ProjectDirectory;
use crate::settings::AppConfig;

/// Path segments naming a viewer proxy start with this.
pub const PROXY_PREFIX: &str = "proxy-";

/// First path segment if it names a viewer proxy.
pub fn proxy_id_from_path(path: &str) -> Option<&str> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| segment.starts_with(PROXY_PREFIX))
}

pub struct ProxyEndpoint {
    cache: Arc<ProxyCache>,
    resolver: ViewerLocationResolver,
    guard: AccessGuard,
    responses: ResponseCache,
    forwarder: RequestForwarder,
}

impl ProxyEndpoint {
    pub fn new(
        collector: Arc<dyn ViewerCollector>,
        directory: Arc<dyn ProjectDirectory>,
        config: &AppConfig,
    ) -> Result<Self> {
        let cache = Arc::new(ProxyCache::new(config.cache.enabled, config.cache.ttl()));
        Ok(Self {
            resolver: ViewerLocationResolver::new(collector, cache.clone(), &config.resolver),
            guard: AccessGuard::new(directory, cache.clone()),
            responses: ResponseCache::new(cache.clone(), &config.cache),
            forwarder: RequestForwarder::new(&config.upstream, &config.auth.session_cookie)?,
            cache,
        })
    }

    pub fn cache(&self) -> &Arc<ProxyCache> {
        &self.cache
    }

    /// Handle one request for `proxy_id`.
    pub async fn handle(
        &self,
        proxy_id: &str,
        request: ProxyRequest,
    ) -> Result<Response<Body>, ProxyError> {
        let location = self.resolver.resolve(proxy_id).await;

        let decision = self
            .guard
            .decide(&request.user_uid, location.project_id.as_deref())
            .await
            .map_err(ProxyError::Directory)?;
        if decision.project.is_none() {
            return Err(ProxyError::NoProject);
        }
        let user = decision.granted_user().ok_or(ProxyError::NotMember)?;

        if request.method == Method::GET
            && let Some(hit) = self.responses.fetch(&request.uri)
        {
            debug!("serving {} from response cache", request.uri);
            return Ok(hit.into_response());
        }

        let Some(vm_address) = location.vm_address.as_deref() else {
            warn!("Proxy error - no viewer instance is available for {}", proxy_id);
            return Err(ProxyError::Unavailable);
        };

        let response = self
            .forwarder
            .forward(&request, vm_address, user)
            .await
            .map_err(|e| {
                warn!("Proxy error - no response from {}: {}", vm_address, e);
                ProxyError::Unavailable
            })?;

        let content_type = response
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if self
            .responses
            .is_cacheable(&request.method, content_type, &request.uri)
        {
            self.responses.store(&request.uri, response.clone());
        }

        Ok(response.into_response())
    }
}
