//! Correlation key extraction
//!
//! Every payload, outbound or inbound, carries the key that ties a reply to
//! its request. The extraction rule is pluggable; the default takes a
//! fixed-width prefix.

use std::fmt;

use tracing::debug;

use crate::error::MuxError;

/// Key grouping all messages of one request/response exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(Vec<u8>);

impl CorrelationKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for CorrelationKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Rule for carving a correlation key out of a payload
///
/// Implementations must be pure: the same payload always yields the same key.
pub trait CorrelationStrategy: Send + Sync {
    /// Extract the key, or fail with `MalformedKey`
    fn extract(&self, payload: &[u8]) -> Result<CorrelationKey, MuxError>;

    /// Minimum number of payload bytes the rule consumes
    fn width(&self) -> usize;
}

/// Uses the first `width` bytes of the payload as the key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixExtractor {
    width: usize,
}

impl PrefixExtractor {
    /// Create an extractor for a fixed-width prefix
    ///
    /// A zero width would put every payload in the same group, so it is rejected.
    pub fn new(width: usize) -> Result<Self, MuxError> {
        debug!(width, "PrefixExtractor::new: called");
        if width == 0 {
            return Err(MuxError::InvalidConfig(
                "correlation-key-width must be at least 1".to_string(),
            ));
        }
        Ok(Self { width })
    }
}

impl CorrelationStrategy for PrefixExtractor {
    fn extract(&self, payload: &[u8]) -> Result<CorrelationKey, MuxError> {
        if payload.len() < self.width {
            return Err(MuxError::MalformedKey {
                len: payload.len(),
                width: self.width,
            });
        }
        Ok(CorrelationKey(payload[..self.width].to_vec()))
    }

    fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_prefix() {
        let extractor = PrefixExtractor::new(3).unwrap();
        let key = extractor.extract(b"999Hello world!").unwrap();
        assert_eq!(key.as_bytes(), b"999");
        assert_eq!(key.to_string(), "999");
    }

    #[test]
    fn test_extract_exact_width() {
        let extractor = PrefixExtractor::new(3).unwrap();
        let key = extractor.extract(b"123").unwrap();
        assert_eq!(key, CorrelationKey::from("123"));
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let extractor = PrefixExtractor::new(3).unwrap();
        let err = extractor.extract(b"12").unwrap_err();
        assert_eq!(err, MuxError::MalformedKey { len: 2, width: 3 });
    }

    #[test]
    fn test_empty_payload_is_malformed() {
        let extractor = PrefixExtractor::new(1).unwrap();
        assert!(matches!(
            extractor.extract(b""),
            Err(MuxError::MalformedKey { len: 0, width: 1 })
        ));
    }

    #[test]
    fn test_zero_width_rejected() {
        assert!(matches!(PrefixExtractor::new(0), Err(MuxError::InvalidConfig(_))));
    }

    #[test]
    fn test_key_display_is_lossy() {
        let key = CorrelationKey::new(vec![0xff, b'a']);
        assert_eq!(key.to_string(), "\u{fffd}a");
    }

    proptest! {
        #[test]
        fn prop_extract_is_deterministic(payload in proptest::collection::vec(any::<u8>(), 0..64), width in 1usize..8) {
            let extractor = PrefixExtractor::new(width).unwrap();
            let first = extractor.extract(&payload);
            let second = extractor.extract(&payload);
            prop_assert_eq!(first.clone(), second);
            match first {
                Ok(key) => prop_assert_eq!(key.as_bytes(), &payload[..width]),
                Err(err) => {
                    let malformed = matches!(err, MuxError::MalformedKey { .. });
                    prop_assert!(payload.len() < width && malformed, "unexpected error: {}", err);
                }
            }
        }

        #[test]
        fn prop_request_and_reply_share_key(body in "[a-zA-Z ]{0,32}", id in 100u32..1000) {
            let extractor = PrefixExtractor::new(3).unwrap();
            let request = format!("{id}{body}");
            let reply = format!("{request}:echo");
            prop_assert_eq!(
                extractor.extract(request.as_bytes()).unwrap(),
                extractor.extract(reply.as_bytes()).unwrap()
            );
        }
    }
}
