//! Time functionality for maggma.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::{DateTime, Utc};
use std::{fmt::Debug, sync::Arc};

/// A point in time, as measured by a [`TimeProvider`].
///
/// `last_updated` fields on documents, `BuildEvent` timestamps, and heartbeat
/// deadlines are all expressed as [`Time`] so that tests can drive the clock
/// deterministically via [`MockProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// The sentinel "epoch" timestamp used when a Store has no documents, or when a
    /// document carries no last-updated field at all (it then sorts as older than any
    /// timestamped document).
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::MIN_UTC)
    }

    /// Construct a [`Time`] from an RFC 3339 string, as found in a serialized document.
    pub fn from_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)))
    }

    /// Render as an RFC 3339 string, the wire format used in documents and [`BuildEvent`]-style
    /// payloads.
    pub fn to_rfc3339(self) -> String {
        self.0.to_rfc3339()
    }

    /// The wrapped [`DateTime<Utc>`].
    pub fn date_time(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// Source of [`Time`] values.
///
/// Everything that needs "now" (incremental selection, build timestamps, heartbeat
/// deadlines) goes through a `TimeProvider` instead of calling `Utc::now()` directly,
/// so tests can substitute a [`MockProvider`] and advance the clock explicitly.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new [`SystemProvider`].
    pub fn new() -> Self {
        Self {}
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a fixed, externally-advanced time.
#[derive(Debug)]
pub struct MockProvider {
    now: parking_lot::Mutex<Time>,
}

impl MockProvider {
    /// Create a new [`MockProvider`] starting at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Wrap in an `Arc` for sharing across Store/Builder instances.
    pub fn arc(start: Time) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    /// Set the mock clock to `time`.
    pub fn set(&self, time: Time) {
        *self.now.lock() = time;
    }

    /// Advance the mock clock by `duration`.
    pub fn inc(&self, duration: chrono::Duration) {
        let mut guard = self.now.lock();
        *guard = Time(guard.0 + duration);
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_older_than_any_real_time() {
        let now = Time::from_rfc3339("2026-01-01T00:00:00Z").unwrap();
        assert!(Time::epoch() < now);
    }

    #[test]
    fn mock_provider_advances() {
        let start = Time::from_rfc3339("2026-01-01T00:00:00Z").unwrap();
        let provider = MockProvider::new(start);
        assert_eq!(provider.now(), start);
        provider.inc(chrono::Duration::seconds(5));
        assert!(provider.now() > start);
    }

    #[test]
    fn rfc3339_round_trips() {
        let t = Time::from_rfc3339("2026-07-26T12:00:00Z").unwrap();
        let s = t.to_rfc3339();
        assert_eq!(Time::from_rfc3339(&s).unwrap(), t);
    }
}
