use axum::http::HeaderMap;
use rand::RngCore;
use std::net::SocketAddr;

pub mod auth;
pub mod password;
pub mod rate_limit;
pub mod validation;

/// Bytes of OS randomness behind each session token
const SESSION_TOKEN_BYTES: usize = 32;

/// Where a request came from, as recorded on sessions and security events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    /// Read the client address from proxy headers, then the user agent.
    ///
    /// `X-Forwarded-For` may hold a chain; the first hop is the client.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let ip_address = header("x-forwarded-for")
            .and_then(|chain| chain.split(',').next().map(|hop| hop.trim().to_string()))
            .filter(|hop| !hop.is_empty())
            .or_else(|| header("x-real-ip"));

        Self {
            ip_address,
            user_agent: header("user-agent"),
        }
    }

    /// Resolve the client of a request.
    ///
    /// Proxy headers are only believed when `trust_proxy` is set; otherwise
    /// the socket peer address is the client.
    pub fn resolve(headers: &HeaderMap, remote: Option<SocketAddr>, trust_proxy: bool) -> Self {
        let from_headers = Self::from_headers(headers);
        let ip_address = if trust_proxy {
            from_headers
                .ip_address
                .or_else(|| remote.map(|addr| addr.ip().to_string()))
        } else {
            remote.map(|addr| addr.ip().to_string())
        };

        Self {
            ip_address,
            user_agent: from_headers.user_agent,
        }
    }

    /// Key used to bucket requests for rate limiting
    pub fn rate_limit_key(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

/// Generate an opaque session token: 256 random bits, hex encoded
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
