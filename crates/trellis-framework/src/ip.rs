//! Client IP extraction.

use http::HeaderMap;

use trellis_core::{RemoteAddr, Request};

/// Resolves the client IP of a request.
pub trait IpExtractor: Send + Sync {
    /// Returns the client IP, or `"unknown"`.
    fn extract(&self, req: &Request) -> String;
}

/// Proxy headers consulted, in order, when proxies are trusted.
const PROXY_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Reads proxy headers when `trust_proxy` is set, then the connection's
/// [`RemoteAddr`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIpExtractor {
    trust_proxy: bool,
}

impl HeaderIpExtractor {
    pub fn new(trust_proxy: bool) -> Self {
        Self { trust_proxy }
    }

    fn from_headers(headers: &HeaderMap) -> Option<String> {
        PROXY_HEADERS.iter().find_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            // x-forwarded-for is "client, proxy1, proxy2"
            let ip = value.split(',').next()?.trim();
            (!ip.is_empty()).then(|| ip.to_string())
        })
    }
}

impl IpExtractor for HeaderIpExtractor {
    fn extract(&self, req: &Request) -> String {
        if self.trust_proxy
            && let Some(ip) = Self::from_headers(req.headers())
        {
            return ip;
        }
        req.extensions()
            .get::<RemoteAddr>()
            .map(|addr| addr.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}
