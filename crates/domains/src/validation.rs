//! Boundary validation. Everything here runs before any state mutation.

use crate::errors::{DomainError, Result};
use crate::models::Location;

/// Maximum comment length in characters, measured after trimming.
pub const MAX_COMMENT_LENGTH: usize = 500;

pub fn is_valid_latitude(latitude: f64) -> bool {
    latitude.is_finite() && (-90.0..=90.0).contains(&latitude)
}

pub fn is_valid_longitude(longitude: f64) -> bool {
    longitude.is_finite() && (-180.0..=180.0).contains(&longitude)
}

pub fn validate_location(latitude: f64, longitude: f64) -> Result<Location> {
    if is_valid_latitude(latitude) && is_valid_longitude(longitude) {
        Ok(Location::new(latitude, longitude))
    } else {
        Err(DomainError::InvalidLocation { latitude, longitude })
    }
}

/// Trims and checks a comment body, returning the trimmed text.
pub fn validate_comment(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidComment("comment cannot be empty".into()));
    }
    if trimmed.chars().count() > MAX_COMMENT_LENGTH {
        return Err(DomainError::InvalidComment(format!(
            "comment must be at most {MAX_COMMENT_LENGTH} characters"
        )));
    }
    Ok(trimmed)
}

/// Escape HTML to prevent XSS. Also escapes `/` so closing tags cannot be
/// smuggled through.
pub fn sanitize_comment(content: &str) -> String {
    html_escape::encode_safe(content.trim()).into_owned()
}

/// A SHA-256 digest rendered as 64 hex characters.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_bounds_are_inclusive() {
        assert!(validate_location(90.0, 180.0).is_ok());
        assert!(validate_location(-90.0, -180.0).is_ok());
        assert!(matches!(
            validate_location(90.0001, 0.0),
            Err(DomainError::InvalidLocation { .. })
        ));
        assert!(validate_location(0.0, -180.5).is_err());
        assert!(validate_location(f64::NAN, 0.0).is_err());
        assert!(validate_location(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_comment_rules() {
        assert_eq!(validate_comment("  hello \n").unwrap(), "hello");
        assert!(matches!(validate_comment("   "), Err(DomainError::InvalidComment(_))));
        assert!(validate_comment(&"a".repeat(500)).is_ok());
        assert!(validate_comment(&"a".repeat(501)).is_err());
        // Multi-byte characters count once each
        assert!(validate_comment(&"é".repeat(500)).is_ok());
    }

    #[test]
    fn test_sanitize_escapes_markup() {
        assert_eq!(
            sanitize_comment(" <script>alert('x')</script> "),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;&#x2F;script&gt;"
        );
    }

    #[test]
    fn test_hash_shape() {
        assert!(is_valid_hash(&"ab".repeat(32)));
        assert!(!is_valid_hash("abc"));
        assert!(!is_valid_hash(&"zz".repeat(32)));
    }
}
