//! Key derivation for admission checks.

use std::net::SocketAddr;

use http::Request;

/// Namespace used by [`ClientAddrKey::default`].
pub const DEFAULT_NAMESPACE: &str = "ip-limiter";

/// Maps a request to the key its limiter bucket is stored under.
///
/// What the key means, and how unique it is, is up to the implementation.
pub trait KeyGenerator<Req>: Send + Sync {
    /// Derive the key for `request`.
    fn key(&self, request: &Req) -> String;
}

impl<Req, F> KeyGenerator<Req> for F
where
    F: Fn(&Req) -> String + Send + Sync,
{
    fn key(&self, request: &Req) -> String {
        self(request)
    }
}

/// Keys requests by caller address: `"<namespace>:<address>"`.
///
/// The address is the first hop of `X-Forwarded-For`, else `X-Real-IP`, else
/// a [`SocketAddr`] request extension (its IP only), else `"unknown"`.
///
/// Forwarding headers are trusted as sent. A caller that reaches the service
/// directly can pick its own bucket by setting them, so only use this
/// generator behind a proxy that overwrites `X-Forwarded-For` and
/// `X-Real-IP`, or supply a [`KeyGenerator`] that reads the peer address.
#[derive(Debug, Clone)]
pub struct ClientAddrKey {
    namespace: String,
}

impl ClientAddrKey {
    /// Create a generator with a custom namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Get the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Default for ClientAddrKey {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl<B> KeyGenerator<Request<B>> for ClientAddrKey {
    fn key(&self, request: &Request<B>) -> String {
        let addr = client_addr(request).unwrap_or_else(|| "unknown".to_string());
        format!("{}:{}", self.namespace, addr)
    }
}

/// Every request maps to the same key, e.g. a fixed resource name.
#[derive(Debug, Clone)]
pub struct FixedKey(pub String);

impl<Req> KeyGenerator<Req> for FixedKey {
    fn key(&self, _request: &Req) -> String {
        self.0.clone()
    }
}

/// Best-effort caller address for `request`.
pub fn client_addr<B>(request: &Request<B>) -> Option<String> {
    let headers = request.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return Some(addr.to_string());
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = real_ip {
        return Some(addr.to_string());
    }

    request
        .extensions()
        .get::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
}
