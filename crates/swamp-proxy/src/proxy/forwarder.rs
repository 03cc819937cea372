//! Outbound requests to viewer VMs.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use log::debug;
use thiserror::Error;

use super::response_cache::CachedResponse;
use crate::auth::cookie_value;
use crate::directory::UserSnapshot;
use crate::settings::UpstreamConfig;

/// A buffered inbound request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path and query, exactly as received.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub user_uid: String,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid header value for {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("invalid upstream URL {0}")]
    InvalidTarget(String),

    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("reading upstream body failed: {0}")]
    Body(#[source] reqwest::Error),
}

/// Issues requests to viewer VMs and trims their responses.
pub struct RequestForwarder {
    client: reqwest::Client,
    scheme: String,
    user_agent: HeaderValue,
    location_marker: String,
    session_cookie: String,
    /// The proxy's own login cookie; never sent to a VM.
    proxy_session_cookie: String,
}

impl RequestForwarder {
    pub fn new(config: &UpstreamConfig, proxy_session_cookie: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        // Viewer VMs present self-signed certificates.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .timeout(config.timeout())
            .build()
            .context("building upstream HTTP client")?;

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .context("upstream.user_agent is not a valid header value")?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            user_agent,
            location_marker: config.location_marker.clone(),
            session_cookie: config.session_cookie.clone(),
            proxy_session_cookie: proxy_session_cookie.to_string(),
        })
    }

    /// Headers sent to the VM: the inbound set with host, cookie, identity and
    /// user agent replaced.
    pub fn outbound_headers(
        &self,
        request: &ProxyRequest,
        vm_address: &str,
        user: &UserSnapshot,
    ) -> Result<HeaderMap, ForwardError> {
        let mut headers = request.headers.clone();

        // The body is re-sent buffered and decoding is off, so framing and
        // encoding negotiation are left to the client.
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::ACCEPT_ENCODING);

        headers.remove(header::COOKIE);
        if let Some(cookie) = self.outbound_cookie(&request.headers) {
            headers.insert(header::COOKIE, header_value("Cookie", &cookie)?);
        }

        headers.insert(header::HOST, header_value("Host", vm_address)?);
        headers.insert(
            header::AUTHORIZATION,
            header_value(
                "Authorization",
                &format!("SWAMP {}", user.username.to_lowercase()),
            )?,
        );
        headers.insert(header::USER_AGENT, self.user_agent.clone());

        Ok(headers)
    }

    /// Only the viewer session when the browser has one. Otherwise every
    /// inbound cookie except the proxy's own session.
    fn outbound_cookie(&self, inbound: &HeaderMap) -> Option<String> {
        let cookies: Vec<&str> = inbound
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .collect();

        if let Some(session) = cookies
            .iter()
            .find_map(|h| cookie_value(h, &self.session_cookie))
        {
            return Some(format!("{}={}", self.session_cookie, session));
        }

        let kept: Vec<&str> = cookies
            .iter()
            .flat_map(|h| h.split(';'))
            .map(str::trim)
            .filter(|pair| !pair.is_empty() && cookie_name(pair) != self.proxy_session_cookie)
            .collect();
        (!kept.is_empty()).then(|| kept.join("; "))
    }

    /// Send `request` to `vm_address` and return the response with only the
    /// passthrough headers left.
    pub async fn forward(
        &self,
        request: &ProxyRequest,
        vm_address: &str,
        user: &UserSnapshot,
    ) -> Result<CachedResponse, ForwardError> {
        let target = format!("{}://{}{}", self.scheme, vm_address, request.uri);
        let url =
            reqwest::Url::parse(&target).map_err(|_| ForwardError::InvalidTarget(target.clone()))?;
        let headers = self.outbound_headers(request, vm_address, user)?;

        debug!("forwarding {} {}", request.method, url);

        let response = self
            .client
            .request(request.method.clone(), url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(ForwardError::Request)?;

        let status = response.status();
        let headers = rewrite_response_headers(status, response.headers(), &self.location_marker);
        let body = response.bytes().await.map_err(ForwardError::Body)?;

        Ok(CachedResponse {
            status,
            headers,
            body,
        })
    }
}

fn cookie_name(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(name, _)| name).trim()
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, ForwardError> {
    HeaderValue::from_str(value).map_err(|_| ForwardError::InvalidHeader {
        name,
        value: value.to_string(),
    })
}

/// Keep `Content-Type` and `Set-Cookie`, plus `Location` on 301/302 cut down
/// to start at `marker`. Everything else is dropped.
pub fn rewrite_response_headers(status: StatusCode, upstream: &HeaderMap, marker: &str) -> HeaderMap {
    let mut rewritten = HeaderMap::new();

    for name in [header::CONTENT_TYPE, header::SET_COOKIE] {
        copy_all(upstream, &mut rewritten, name);
    }

    if matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
        && let Some(location) = upstream.get(header::LOCATION)
    {
        rewritten.insert(header::LOCATION, rewrite_location(location, marker));
    }

    rewritten
}

fn copy_all(from: &HeaderMap, to: &mut HeaderMap, name: HeaderName) {
    for value in from.get_all(&name) {
        to.append(name.clone(), value.clone());
    }
}

fn rewrite_location(location: &HeaderValue, marker: &str) -> HeaderValue {
    location
        .to_str()
        .ok()
        .and_then(|text| text.find(marker).map(|pos| &text[pos..]))
        .and_then(|rest| HeaderValue::from_str(rest).ok())
        .unwrap_or_else(|| location.clone())
}
