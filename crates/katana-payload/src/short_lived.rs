//! Payloads that refuse access once their time to live has passed.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::Map;
use crate::error::PayloadError;
use crate::path::PathSpec;
use crate::payload::Payload;

/// Time to live applied when none is given.
pub const DEFAULT_TTL: Duration = Duration::from_secs(8);

/// A [`Payload`] that expires a fixed time after creation.
///
/// Every read and write revalidates the time to live and fails with
/// [`PayloadError::Expired`] once it has passed.
#[derive(Debug, Clone)]
pub struct ShortLivedPayload {
    payload: Payload,
    created: Instant,
    ttl: Duration,
}

impl ShortLivedPayload {
    /// Wraps `payload` with the default eight second time to live.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self::with_ttl(payload, DEFAULT_TTL)
    }

    /// Wraps `payload` with a custom time to live.
    #[must_use]
    pub fn with_ttl(payload: Payload, ttl: Duration) -> Self {
        Self {
            payload,
            created: Instant::now(),
            ttl,
        }
    }

    /// The configured time to live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Time elapsed since creation.
    #[must_use]
    pub fn alive(&self) -> Duration {
        self.created.elapsed()
    }

    /// Returns `true` while the time to live has not passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.alive() < self.ttl
    }

    /// Checks the time to live.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Expired`] carrying the seconds past expiry.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let alive = self.alive();
        if alive < self.ttl {
            return Ok(());
        }
        Err(PayloadError::Expired {
            offset: alive.saturating_sub(self.ttl).as_secs_f64(),
        })
    }

    /// Expiry-checked [`Payload::get`].
    ///
    /// # Errors
    ///
    /// Fails when expired or when the path does not resolve.
    pub fn get<'p>(&self, path: impl Into<PathSpec<'p>>) -> Result<&Value, PayloadError> {
        self.validate()?;
        self.payload.get(path)
    }

    /// Expiry-checked [`Payload::path_exists`].
    ///
    /// # Errors
    ///
    /// Fails when expired.
    pub fn path_exists<'p>(&self, path: impl Into<PathSpec<'p>>) -> Result<bool, PayloadError> {
        self.validate()?;
        Ok(self.payload.path_exists(path))
    }

    /// Expiry-checked [`Payload::set`].
    ///
    /// # Errors
    ///
    /// Fails when expired or when the path cannot be written.
    pub fn set<'p>(
        &mut self,
        path: impl Into<PathSpec<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PayloadError> {
        self.validate()?;
        self.payload.set(path, value)?;
        Ok(self)
    }

    /// Expiry-checked [`Payload::push`].
    ///
    /// # Errors
    ///
    /// Fails when expired or when the leaf is not a list.
    pub fn push<'p>(
        &mut self,
        path: impl Into<PathSpec<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PayloadError> {
        self.validate()?;
        self.payload.push(path, value)?;
        Ok(self)
    }

    /// Expiry-checked [`Payload::merge`].
    ///
    /// # Errors
    ///
    /// Fails when expired or when the target is not a mapping.
    pub fn merge<'p>(
        &mut self,
        path: impl Into<PathSpec<'p>>,
        value: &Map,
    ) -> Result<&mut Self, PayloadError> {
        self.validate()?;
        self.payload.merge(path, value)?;
        Ok(self)
    }

    /// Releases the wrapped payload if it is still alive.
    ///
    /// # Errors
    ///
    /// Fails when expired.
    pub fn into_payload(self) -> Result<Payload, PayloadError> {
        self.validate()?;
        Ok(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_payloads_allow_access() {
        let mut payload = ShortLivedPayload::new(Payload::new());
        payload.set("meta/id", "abc").expect("set");
        assert_eq!(payload.get("meta/id").expect("get"), "abc");
        assert_eq!(payload.ttl(), DEFAULT_TTL);
    }

    #[test]
    fn expired_payloads_report_the_overage() {
        let mut payload =
            ShortLivedPayload::with_ttl(Payload::new(), Duration::from_millis(100));
        payload.set("a", 1).expect("set before expiry");
        thread::sleep(Duration::from_millis(150));

        let Err(PayloadError::Expired { offset }) = payload.get("a") else {
            panic!("expected expiry on read");
        };
        assert!((0.04..2.0).contains(&offset), "unexpected overage {offset}");
        assert!(matches!(
            payload.set("b", 2),
            Err(PayloadError::Expired { .. })
        ));
        assert!(!payload.is_valid());
    }

    #[test]
    fn expiry_message_uses_seconds() {
        let error = PayloadError::Expired { offset: 0.05 };
        assert_eq!(error.to_string(), "Payload expired 0.050 seconds ago");
    }
}
