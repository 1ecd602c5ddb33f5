use std::{net::IpAddr, str::FromStr};

use actix_web::{http::header::HeaderMap, HttpRequest};
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;

static FORWARDED_FOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"for="?(?P<ip>[^;,"]+)"#).expect("Forwarded header pattern is valid"));

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        // The left-most address is the original client
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        result = req
            .headers()
            .get("Forwarded")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| FORWARDED_FOR.captures(v))
            .and_then(|caps| caps.name("ip"))
            .and_then(|m| IpAddr::from_str(m.as_str()).ok());
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.peer_addr().map(|a| a.ip());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr
    })
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("Authorization")?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn remote_ip_sources() {
        let req = TestRequest::default()
            .peer_addr("10.0.0.1:5000".parse().unwrap())
            .insert_header(("X-Forwarded-For", "203.0.113.9, 10.0.0.1"))
            .insert_header(("Forwarded", "for=198.51.100.7;proto=https"))
            .to_http_request();
        assert_eq!(get_remote_ip(&req, true, true), Some("203.0.113.9".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, true), Some("198.51.100.7".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, false), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn bearer_tokens() {
        let req = TestRequest::default().insert_header(("Authorization", "Bearer abc123")).to_http_request();
        assert_eq!(bearer_token(req.headers()), Some("abc123"));
        let req = TestRequest::default().insert_header(("Authorization", "Basic abc123")).to_http_request();
        assert_eq!(bearer_token(req.headers()), None);
        let req = TestRequest::default().insert_header(("Authorization", "Bearer ")).to_http_request();
        assert_eq!(bearer_token(req.headers()), None);
        assert_eq!(bearer_token(TestRequest::default().to_http_request().headers()), None);
    }
}
