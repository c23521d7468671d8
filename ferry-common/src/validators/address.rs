//! Reported endpoint address validation

use std::net::IpAddr;

use thiserror::Error;

/// Maximum length for a reported address
pub const MAX_ADDRESS_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is longer than {MAX_ADDRESS_LENGTH} characters")]
    TooLong,
    #[error("address contains control characters")]
    InvalidCharacters,
}

/// Validate a client-reported address string
///
/// The string does not have to parse as an IP. Unparseable values are
/// accepted and simply ignored by the classifier.
///
/// # Errors
///
/// Returns an `AddressError` if the value is oversized or contains
/// control characters.
pub fn validate_address(address: &str) -> Result<(), AddressError> {
    if address.len() > MAX_ADDRESS_LENGTH {
        return Err(AddressError::TooLong);
    }
    if address.chars().any(char::is_control) {
        return Err(AddressError::InvalidCharacters);
    }
    Ok(())
}

/// Parse a reported address as an IP, accepting `ip` or `ip:port` forms
#[must_use]
pub fn parse_address(address: &str) -> Option<IpAddr> {
    let trimmed = address.trim();
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Some(ip);
    }
    trimmed
        .parse::<std::net::SocketAddr>()
        .ok()
        .map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address("192.168.1.5").is_ok());
        assert!(validate_address("not an ip").is_ok());
        assert_eq!(
            validate_address(&"1".repeat(65)),
            Err(AddressError::TooLong)
        );
        assert_eq!(
            validate_address("10.0.0.1\n"),
            Err(AddressError::InvalidCharacters)
        );
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("192.168.1.5"),
            Some("192.168.1.5".parse().unwrap())
        );
        assert_eq!(
            parse_address("10.0.0.2:7600"),
            Some("10.0.0.2".parse().unwrap())
        );
        assert_eq!(parse_address("[::1]:80"), Some("::1".parse().unwrap()));
        assert_eq!(parse_address("localhost"), None);
    }
}
