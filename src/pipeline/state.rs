//! Recording state management

use std::time::Instant;

/// Recording pipeline state machine
///
/// Transitions are validated so that a stop racing with in-flight queued
/// frames can never finalize the container early: `Finishing` is only
/// entered once stop has been requested AND the frame queue has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No session active
    Idle,

    /// Writer allocation in progress; frames are not accepted yet
    Starting,

    /// Session live: frames enqueued, drain task appending
    Recording {
        /// When the session started accepting frames
        started_at: Instant,
    },

    /// Stop requested and queue drained; flushing and sealing the file
    Finishing,
}

impl RecorderState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &RecorderState) -> bool {
        use RecorderState::*;

        match (self, target) {
            // From Idle
            (Idle, Starting) => true,

            // From Starting
            (Starting, Recording { .. }) => true,
            (Starting, Idle) => true, // writer allocation failed

            // From Recording
            (Recording { .. }, Finishing) => true,

            // From Finishing
            (Finishing, Idle) => true,

            // Self-transitions
            (a, b) if a == b => true,

            // All other transitions invalid
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            RecorderState::Idle => "Idle",
            RecorderState::Starting => "Starting",
            RecorderState::Recording { .. } => "Recording",
            RecorderState::Finishing => "Finishing",
        }
    }

    /// Check if the session accepts new frames
    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderState::Recording { .. })
    }

    /// Check if a session is active in any phase
    pub fn is_active(&self) -> bool {
        !matches!(self, RecorderState::Idle)
    }

    /// Get the duration since recording started (if recording)
    pub fn recording_duration(&self) -> Option<std::time::Duration> {
        if let RecorderState::Recording { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = RecorderState::Idle;
        let starting = RecorderState::Starting;
        let recording = RecorderState::Recording {
            started_at: Instant::now(),
        };
        let finishing = RecorderState::Finishing;

        assert!(idle.can_transition_to(&starting));
        assert!(starting.can_transition_to(&recording));
        assert!(recording.can_transition_to(&finishing));
        assert!(finishing.can_transition_to(&idle));

        // Failed writer allocation backs out to Idle
        assert!(starting.can_transition_to(&idle));

        // Self-transitions
        assert!(idle.can_transition_to(&idle));
        assert!(recording.can_transition_to(&recording));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = RecorderState::Idle;
        let recording = RecorderState::Recording {
            started_at: Instant::now(),
        };
        let finishing = RecorderState::Finishing;

        assert!(!idle.can_transition_to(&recording)); // Must go through Starting
        assert!(!idle.can_transition_to(&finishing));
        assert!(!recording.can_transition_to(&idle)); // Must finish first
        assert!(!finishing.can_transition_to(&recording)); // No restart mid-flush
    }

    #[test]
    fn test_state_checks() {
        let recording = RecorderState::Recording {
            started_at: Instant::now(),
        };
        assert!(recording.is_recording());
        assert!(recording.is_active());
        assert!(recording.recording_duration().is_some());

        assert!(!RecorderState::Idle.is_active());
        assert!(RecorderState::Finishing.is_active());
        assert!(!RecorderState::Finishing.is_recording());
    }
}
