use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{COOKIE, InvalidHeaderValue};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use uuid::Uuid;

pub const USER_ID_COOKIE: &str = "user_id";
pub const COOKIE_MAX_AGE_SECONDS: u64 = 30 * 24 * 60 * 60;
pub const MAX_USER_ID_LEN: usize = 128;
pub const UNKNOWN_IP: &str = "unknown";

/// Who is asking, as far as a cookie and a socket can tell.
///
/// The cookie id is the identity. The IP address is advisory: it may be shared
/// behind NAT and is only used to correlate abuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: String,
    pub ip_address: String,
    /// The id was minted for this request and must be handed back as a cookie.
    pub fresh: bool,
}

impl ResolvedIdentity {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let ip_address = client_ip(headers, peer);
        match cookie_user_id(headers) {
            Some(user_id) => Self {
                user_id,
                ip_address,
                fresh: false,
            },
            None => Self {
                user_id: Uuid::new_v4().to_string(),
                ip_address,
                fresh: true,
            },
        }
    }
}

impl<S> FromRequestParts<S> for ResolvedIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::resolve(&parts.headers, peer))
    }
}

/// Extract a well-formed `user_id` cookie value, ignoring anything suspicious.
pub fn cookie_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == USER_ID_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| is_valid_user_id(value))
        .map(str::to_string)
}

pub fn is_valid_user_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_USER_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b';' | b',' | b'"' | b'\\'))
}

/// Client IP from `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Whether an IP string is specific enough to rate limit on.
pub fn is_routable_ip(ip_address: &str) -> bool {
    match ip_address.parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback() && !ip.is_unspecified(),
        Err(_) => false,
    }
}

/// `Set-Cookie` value persisting a freshly minted id for thirty days.
pub fn user_id_cookie(user_id: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    assert!(is_valid_user_id(user_id), "Minted user id must be cookie safe");
    let mut cookie = format!(
        "{USER_ID_COOKIE}={user_id}; Path=/; Max-Age={COOKIE_MAX_AGE_SECONDS}; HttpOnly; SameSite=Strict"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
