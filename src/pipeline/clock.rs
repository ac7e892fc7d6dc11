//! Session clock for recording timestamps

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::types::MediaTime;

/// Sentinel for "origin not yet established".
const ORIGIN_UNSET: i64 = i64::MIN;

/// Timeline origin for a recording session.
///
/// All media share one origin on the capture timeline: the first audio
/// chunk establishes it (video then carries the capture-time offset to
/// that chunk), and without audio the first drained frame anchors it so
/// the file still starts at zero.
///
/// # Thread Safety
///
/// The clock is cloned across the audio forwarder and the drain thread.
/// The origin uses an atomic with a set-once discipline, no locks on the
/// hot path.
#[derive(Clone)]
pub struct SessionClock {
    /// Timeline origin in ticks, [`ORIGIN_UNSET`] until established
    origin: Arc<AtomicI64>,
}

impl SessionClock {
    /// Create a clock with the origin not yet established.
    pub fn new() -> Self {
        Self {
            origin: Arc::new(AtomicI64::new(ORIGIN_UNSET)),
        }
    }

    /// Establish the origin from the first media timestamp. Only the first
    /// call wins; later calls are ignored.
    pub fn set_origin_once(&self, origin: MediaTime) {
        let _ = self.origin.compare_exchange(
            ORIGIN_UNSET,
            origin.ticks,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Whether the timeline origin has been established.
    pub fn origin_established(&self) -> bool {
        self.origin.load(Ordering::Acquire) != ORIGIN_UNSET
    }

    /// The timeline origin, zero if not yet established.
    pub fn origin(&self) -> MediaTime {
        match self.origin.load(Ordering::Acquire) {
            ORIGIN_UNSET => MediaTime::ZERO,
            ticks => MediaTime::from_ticks(ticks),
        }
    }

    /// File-timeline timestamp for media captured at `pts`: the capture
    /// timestamp relative to the shared origin. Media captured ahead of
    /// the origin clamps to zero.
    pub fn presentation(&self, pts: MediaTime) -> MediaTime {
        MediaTime::from_ticks((pts.ticks - self.origin().ticks).max(0))
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_set_once() {
        let clock = SessionClock::new();
        assert!(!clock.origin_established());

        clock.set_origin_once(MediaTime::from_ticks(120));
        assert!(clock.origin_established());
        assert_eq!(clock.origin(), MediaTime::from_ticks(120));

        // Second attempt is ignored
        clock.set_origin_once(MediaTime::from_ticks(999));
        assert_eq!(clock.origin(), MediaTime::from_ticks(120));
    }

    #[test]
    fn test_presentation_is_origin_relative() {
        let clock = SessionClock::new();
        clock.set_origin_once(MediaTime::from_ticks(600));
        assert_eq!(
            clock.presentation(MediaTime::from_ticks(620)),
            MediaTime::from_ticks(20)
        );
        // Media captured ahead of the origin clamps to the file start
        assert_eq!(
            clock.presentation(MediaTime::from_ticks(580)),
            MediaTime::ZERO
        );
    }

    #[test]
    fn test_presentation_without_origin_passes_through() {
        let clock = SessionClock::new();
        assert_eq!(
            clock.presentation(MediaTime::from_ticks(40)),
            MediaTime::from_ticks(40)
        );
    }
}
