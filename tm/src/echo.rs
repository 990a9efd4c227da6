//! Echo service
//!
//! Server-side handler used by `tm serve` and `tm demo`, plus the client-side
//! discard policy that pairs with its timeout test inputs.

use std::time::Duration;

use async_trait::async_trait;
use muxcore::{CallResult, DiscardPolicy, FailOnDiscard, Group, Handler, MuxError};
use tracing::debug;

/// Input that always fails
pub const FAIL: &str = "FAIL";

/// Prefix of inputs that are answered only after the slow delay
pub const TIMEOUT_TEST: &str = "TIMEOUT_TEST";

/// Discarded call resolves as a handler failure
pub const TIMEOUT_TEST_THROW: &str = "TIMEOUT_TEST_THROW";

/// Discarded call resolves as success carrying the original request
pub const TIMEOUT_TEST_MSG: &str = "TIMEOUT_TEST_MSG";

/// Replies `<input>:echo`
#[derive(Debug, Clone)]
pub struct EchoService {
    slow_delay: Duration,
}

impl EchoService {
    pub fn new(slow_delay: Duration) -> Self {
        Self { slow_delay }
    }

    pub fn slow_delay(&self) -> Duration {
        self.slow_delay
    }
}

impl Default for EchoService {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000))
    }
}

#[async_trait]
impl Handler for EchoService {
    async fn handle(&self, request: Vec<u8>) -> Result<Vec<u8>, MuxError> {
        let input = String::from_utf8_lossy(&request);
        debug!(%input, "EchoService::handle: called");

        if input == FAIL {
            return Err(MuxError::Handler("Failure Demonstration".to_string()));
        }
        if input.starts_with(TIMEOUT_TEST) {
            tokio::time::sleep(self.slow_delay).await;
        }
        Ok(format!("{input}:echo").into_bytes())
    }
}

impl DiscardPolicy for EchoService {
    fn on_discard(&self, group: &Group) -> CallResult {
        let request = group.request().map(|m| m.payload().to_vec()).unwrap_or_default();
        let input = String::from_utf8_lossy(&request).into_owned();
        debug!(%input, size = group.size(), "EchoService::on_discard: called");

        match input.as_str() {
            TIMEOUT_TEST_THROW => Err(MuxError::Handler(format!("No response received for {input}"))),
            TIMEOUT_TEST_MSG => Ok(request),
            _ => FailOnDiscard.on_discard(group),
        }
    }
}

/// Requests `<key>Hello world!` with `count` distinct numeric keys of `width` digits
///
/// Keys start at the smallest `width`-digit number so none has a leading zero.
pub fn demo_requests(width: usize, count: usize) -> Result<Vec<String>, MuxError> {
    let exp = u32::try_from(width).unwrap_or(u32::MAX);
    let first = 10usize.checked_pow(exp.saturating_sub(1)).unwrap_or(usize::MAX);
    let available = 10usize
        .checked_pow(exp)
        .map_or(usize::MAX, |end| end - first);
    if width == 0 || count > available {
        return Err(MuxError::InvalidConfig(format!(
            "demo count {count} exceeds the {available} distinct keys of width {width}"
        )));
    }
    Ok((0..count).map(|i| format!("{:0width$}Hello world!", first + i)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxcore::{AdmitResult, Aggregator, CorrelationKey, Message, MuxConfig};
    use std::time::Instant;

    fn discarded(request: &str) -> Group {
        let agg = Aggregator::from_config(&MuxConfig::default());
        let key = CorrelationKey::new(request.as_bytes()[..3].to_vec());
        assert!(matches!(
            agg.begin(key, Message::outbound(request), 1),
            AdmitResult::Pending { .. }
        ));
        agg.expire(Instant::now() + Duration::from_secs(60)).remove(0)
    }

    #[tokio::test]
    async fn test_echo_reply() {
        let service = EchoService::default();
        let reply = service.handle(b"999Hello world!".to_vec()).await.unwrap();
        assert_eq!(reply, b"999Hello world!:echo".to_vec());
    }

    #[tokio::test]
    async fn test_fail_input() {
        let service = EchoService::default();
        let err = service.handle(FAIL.as_bytes().to_vec()).await.unwrap_err();
        assert_eq!(err, MuxError::Handler("Failure Demonstration".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_input_is_delayed() {
        let service = EchoService::new(Duration::from_millis(50));
        let started = Instant::now();
        let reply = service.handle(b"TIMEOUT_TEST_RETURN".to_vec()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(reply, b"TIMEOUT_TEST_RETURN:echo".to_vec());
    }

    #[test]
    fn test_discard_policy() {
        let service = EchoService::default();

        let err = service.on_discard(&discarded(TIMEOUT_TEST_THROW)).unwrap_err();
        assert_eq!(
            err,
            MuxError::Handler("No response received for TIMEOUT_TEST_THROW".to_string())
        );

        let ok = service.on_discard(&discarded(TIMEOUT_TEST_MSG)).unwrap();
        assert_eq!(ok, TIMEOUT_TEST_MSG.as_bytes().to_vec());

        let err = service.on_discard(&discarded("TIMEOUT_TEST_RETURN")).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("No response received for TIMEOUT_TEST_RETURN"));
    }

    #[test]
    fn test_demo_requests_use_distinct_keys() {
        let requests = demo_requests(3, 900).unwrap();
        assert_eq!(requests.len(), 900);
        assert_eq!(requests[0], "100Hello world!");
        assert_eq!(requests[899], "999Hello world!");

        let keys: std::collections::HashSet<_> = requests.iter().map(|r| &r[..3]).collect();
        assert_eq!(keys.len(), 900);
    }

    #[test]
    fn test_demo_requests_reject_count_past_key_space() {
        let err = demo_requests(3, 901).unwrap_err();
        assert!(matches!(err, MuxError::InvalidConfig(_)));

        let err = demo_requests(1, 10).unwrap_err();
        assert!(matches!(err, MuxError::InvalidConfig(_)));
        assert_eq!(demo_requests(1, 9).unwrap().last().unwrap(), "9Hello world!");
    }
}
