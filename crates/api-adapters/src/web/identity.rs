//! Voter identity for API calls.
//!
//! Clients normally send the two digests they computed themselves. When
//! they do not, the server hashes the raw fingerprint header and the
//! client IP taken from proxy headers.

use auth_adapters::{IdentityHasher, RawIdentity};
use axum::http::HeaderMap;
use domains::validation::is_valid_hash;
use domains::VoterIdentity;

use super::ApiError;

pub const FINGERPRINT_HEADER: &str = "x-device-fingerprint";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    header(headers, FORWARDED_FOR_HEADER)
        .and_then(|chain| chain.split(',').map(str::trim).find(|hop| !hop.is_empty()))
        .or_else(|| header(headers, REAL_IP_HEADER))
        .map(str::to_owned)
}

pub(crate) fn resolve(
    hasher: &IdentityHasher,
    headers: &HeaderMap,
    supplied: Option<VoterIdentity>,
) -> Result<VoterIdentity, ApiError> {
    if let Some(identity) = supplied {
        if !is_valid_hash(&identity.fingerprint_hash) || !is_valid_hash(&identity.ip_hash) {
            return Err(ApiError::BadRequest(
                "identity hashes must be 64 hex characters".to_string(),
            ));
        }
        return Ok(identity);
    }

    let fingerprint = header(headers, FINGERPRINT_HEADER)
        .ok_or_else(|| ApiError::BadRequest("missing voter identity".to_string()))?;
    let raw = RawIdentity {
        fingerprint: fingerprint.to_owned(),
        ip: client_ip(headers).unwrap_or_else(|| "unknown".to_string()),
    };
    Ok(hasher.identity(&raw))
}

/// Pairs two optional hash fields into an identity, if both are present.
pub(crate) fn from_parts(fingerprint_hash: Option<String>, ip_hash: Option<String>) -> Option<VoterIdentity> {
    match (fingerprint_hash, ip_hash) {
        (Some(fingerprint), Some(ip)) => Some(VoterIdentity::new(fingerprint, ip)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(" 203.0.113.7, 10.0.0.1"));
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));

        headers.remove(FORWARDED_FOR_HEADER);
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_supplied_hashes_are_validated() {
        let hasher = IdentityHasher::unsalted();
        let headers = HeaderMap::new();

        let ok = resolve(&hasher, &headers, Some(VoterIdentity::new(HASH_A, HASH_B))).unwrap();
        assert_eq!(ok.fingerprint_hash, HASH_A);

        let bad = resolve(&hasher, &headers, Some(VoterIdentity::new("short", HASH_B)));
        assert!(matches!(bad, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_headers_are_hashed_server_side() {
        let hasher = IdentityHasher::unsalted();
        let mut headers = HeaderMap::new();
        assert!(resolve(&hasher, &headers, None).is_err());

        headers.insert(FINGERPRINT_HEADER, HeaderValue::from_static("device-1"));
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("198.51.100.4"));
        let identity = resolve(&hasher, &headers, None).unwrap();
        assert_eq!(identity.fingerprint_hash, hasher.digest("device-1"));
        assert_eq!(identity.ip_hash, hasher.digest("198.51.100.4"));
    }
}
