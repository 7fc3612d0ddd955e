//! Request context captured into audit rows

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{headers::UserAgent, TypedHeader};

/// Longest user agent kept in audit rows
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Client address and user agent of the current request
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Client address in canonical form; anything that is not an IP address
    /// is dropped
    pub fn client_ip(&self) -> Option<String> {
        parse_ip(self.ip_address.as_deref()?)
    }

    /// User agent cut to [`MAX_USER_AGENT_LEN`] bytes on a char boundary
    pub fn bounded_user_agent(&self) -> Option<&str> {
        let ua = self.user_agent.as_deref()?;
        if ua.len() <= MAX_USER_AGENT_LEN {
            return Some(ua);
        }
        let mut end = MAX_USER_AGENT_LEN;
        while !ua.is_char_boundary(end) {
            end -= 1;
        }
        Some(&ua[..end])
    }
}

fn parse_ip(raw: &str) -> Option<String> {
    raw.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = TypedHeader::<UserAgent>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|TypedHeader(ua)| ua.as_str().to_string());

        // First hop of X-Forwarded-For wins over the socket peer
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(parse_ip);

        let ip_address = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(RequestMeta {
            ip_address,
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(forwarded: Option<&str>) -> RequestMeta {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000))));
        RequestMeta::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_forwarded_hop_wins() {
        let meta = extract(Some("203.0.113.7, 10.0.0.1")).await;
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_garbage_forwarded_hop_falls_back_to_peer() {
        let meta = extract(Some(&"x".repeat(65))).await;
        assert_eq!(meta.ip_address.as_deref(), Some("10.0.0.9"));

        let meta = extract(None).await;
        assert_eq!(meta.ip_address.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_audit_values_are_bounded() {
        let meta = RequestMeta {
            ip_address: Some("1".repeat(65)),
            user_agent: Some("ก".repeat(400)),
        };
        assert_eq!(meta.client_ip(), None);

        let ua = meta.bounded_user_agent().unwrap();
        assert!(ua.len() <= MAX_USER_AGENT_LEN);
        assert!(ua.chars().all(|c| c == 'ก'));

        let v6 = RequestMeta {
            ip_address: Some(" 2001:db8::1 ".into()),
            user_agent: None,
        };
        assert_eq!(v6.client_ip().as_deref(), Some("2001:db8::1"));
        assert_eq!(v6.bounded_user_agent(), None);
    }
}
