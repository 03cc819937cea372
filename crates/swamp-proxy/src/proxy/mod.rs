//! Viewer instance proxy.
//!
//! Requests under `/proxy-<id>/...` are relayed to the viewer VM that the
//! collector reports for `proxy-<id>`, after checking that the session user
//! belongs to the VM's project.

mod cache;
mod endpoint;
mod error;
mod forwarder;
mod guard;
mod resolver;
mod response_cache;

pub use cache::{ProxyCache, TtlMap};
pub use endpoint::{PROXY_PREFIX, ProxyEndpoint, proxy_id_from_path};
pub use error::{NO_PROJECT_MESSAGE, NOT_MEMBER_MESSAGE, ProxyError, UNAVAILABLE_MESSAGE};
pub use forwarder::{ForwardError, ProxyRequest, RequestForwarder, rewrite_response_headers};
pub use guard::{AccessGuard, AuthorizationDecision};
pub use resolver::{ViewerLocation, ViewerLocationResolver};
pub use response_cache::{CachedResponse, ResponseCache};
