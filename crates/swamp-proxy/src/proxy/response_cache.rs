//! Cacheability rules and storage for viewer responses.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode, header};
use bytes::Bytes;
use log::debug;

use super::cache::ProxyCache;
use crate::settings::CacheConfig;

/// A complete upstream response kept for replay.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Decides which responses are cached and serves cache hits.
pub struct ResponseCache {
    cache: Arc<ProxyCache>,
    cacheable_content_types: Vec<String>,
    excluded_paths: Vec<String>,
}

impl ResponseCache {
    pub fn new(cache: Arc<ProxyCache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            cacheable_content_types: config.cacheable_content_types.clone(),
            excluded_paths: config.excluded_paths.clone(),
        }
    }

    /// GET, an allow-listed content type, and no excluded path fragment.
    pub fn is_cacheable(&self, method: &Method, content_type: Option<&str>, uri: &str) -> bool {
        if *method != Method::GET {
            return false;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        self.cacheable_content_types
            .iter()
            .any(|allowed| allowed == content_type)
            && !self.excluded_paths.iter().any(|p| uri.contains(p.as_str()))
    }

    /// Store `response` for `uri` unless a live entry already exists.
    ///
    /// Responses setting cookies belong to one browser session and are never
    /// stored.
    pub fn store(&self, uri: &str, response: CachedResponse) -> bool {
        if response.headers.contains_key(header::SET_COOKIE) {
            debug!("not caching {}: response sets cookies", uri);
            return false;
        }
        let stored = self.cache.add_response(uri, response);
        if stored {
            debug!("cached response for {}", uri);
        }
        stored
    }

    /// A live cached response for `uri`, without `Transfer-Encoding`.
    pub fn fetch(&self, uri: &str) -> Option<CachedResponse> {
        let mut cached = self.cache.response(uri)?;
        cached.headers.remove(header::TRANSFER_ENCODING);
        Some(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn response_cache(ttl: Duration) -> ResponseCache {
        ResponseCache::new(Arc::new(ProxyCache::new(true, ttl)), &CacheConfig::default())
    }

    #[test]
    fn cacheability_rules() {
        let cache = response_cache(Duration::from_secs(600));

        assert!(cache.is_cacheable(&Method::GET, Some("image/png"), "/x"));
        assert!(cache.is_cacheable(
            &Method::GET,
            Some("text/javascript;charset=utf-8"),
            "/proxy-1/app.js"
        ));
        assert!(!cache.is_cacheable(&Method::POST, Some("image/png"), "/x"));
        assert!(!cache.is_cacheable(&Method::GET, Some("text/html"), "/x"));
        assert!(!cache.is_cacheable(&Method::GET, Some("image/png"), "/lift/comet/x"));
        assert!(!cache.is_cacheable(&Method::GET, None, "/x"));
        // Match is exact, parameters included.
        assert!(!cache.is_cacheable(&Method::GET, Some("text/javascript"), "/x"));
    }

    #[tokio::test(start_paused = true)]
    async fn stored_response_replays_until_ttl() {
        let cache = response_cache(Duration::from_secs(600));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        let response = CachedResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"\x89PNG"),
        };

        assert!(cache.store("/proxy-1/logo.png", response));

        let hit = cache.fetch("/proxy-1/logo.png").unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert!(hit.headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(hit.body, Bytes::from_static(b"\x89PNG"));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(cache.fetch("/proxy-1/logo.png").is_none());
    }

    #[tokio::test]
    async fn first_stored_response_wins() {
        let cache = response_cache(Duration::from_secs(600));
        let make = |body: &'static [u8]| CachedResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body),
        };

        assert!(cache.store("/u", make(b"one")));
        assert!(!cache.store("/u", make(b"two")));
        assert_eq!(cache.fetch("/u").unwrap().body, Bytes::from_static(b"one"));
    }

    #[test]
    fn responses_setting_cookies_are_not_stored() {
        let cache = response_cache(Duration::from_secs(600));
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers.insert(
            header::SET_COOKIE,
            HeaderValue::from_static("JSESSIONID=owner-session; Path=/"),
        );

        let stored = cache.store(
            "/proxy-1/logo.png",
            CachedResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from_static(b"\x89PNG"),
            },
        );

        assert!(!stored);
        assert!(cache.fetch("/proxy-1/logo.png").is_none());
    }
}
