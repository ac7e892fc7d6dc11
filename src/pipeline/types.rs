//! Core types for the pipeline system

use bytes::Bytes;

/// Ticks per second for all presentation timestamps.
///
/// 600 is a common multiple of the standard video rates (24, 25, 30, 60),
/// so frame durations stay integral and long recordings accumulate no
/// floating-point drift.
pub const TIMESCALE: i64 = 600;

/// Presentation timestamp in a rational time base of [`TIMESCALE`] ticks
/// per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MediaTime {
    /// Ticks since the session epoch
    pub ticks: i64,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime { ticks: 0 };

    /// Create a timestamp from raw ticks.
    pub fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// Duration of a single frame at the given rate.
    pub fn frame_duration(fps: u32) -> Self {
        Self {
            ticks: TIMESCALE / fps.max(1) as i64,
        }
    }

    /// Multiply by an integer count (e.g. ticks of the nth frame).
    pub fn scaled(&self, count: i64) -> Self {
        Self {
            ticks: self.ticks * count,
        }
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ticks, TIMESCALE)
    }
}

/// Raw PCM audio delivered by the capture side.
///
/// Samples are interleaved 32-bit floats; `pts` is the capture time of the
/// first sample in the chunk.
#[derive(Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub pts: MediaTime,
}

impl AudioChunk {
    /// Interleaved f32 samples decoded from the byte payload.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Number of sample frames (samples per channel) in the chunk.
    pub fn frame_count(&self) -> usize {
        self.data.len() / 4 / self.channels.max(1) as usize
    }
}

impl std::fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChunk")
            .field("frames", &self.frame_count())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("pts", &self.pts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_is_integral() {
        assert_eq!(MediaTime::frame_duration(30).ticks, 20);
        assert_eq!(MediaTime::frame_duration(60).ticks, 10);
        assert_eq!(MediaTime::frame_duration(24).ticks, 25);
    }

    #[test]
    fn test_no_drift_over_long_recording() {
        // One hour at 30 fps lands exactly on the hour mark
        let per_frame = MediaTime::frame_duration(30);
        assert_eq!(per_frame.scaled(30 * 3600).ticks, TIMESCALE * 3600);
    }

    #[test]
    fn test_audio_chunk_samples() {
        let mut payload = Vec::new();
        for s in [0.5f32, -0.25, 1.0, 0.0] {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        let chunk = AudioChunk {
            data: Bytes::from(payload),
            sample_rate: 48_000,
            channels: 2,
            pts: MediaTime::ZERO,
        };
        assert_eq!(chunk.frame_count(), 2);
        let samples: Vec<f32> = chunk.samples().collect();
        assert_eq!(samples, vec![0.5, -0.25, 1.0, 0.0]);
    }
}
