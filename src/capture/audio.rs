//! Microphone capture
//!
//! cpal delivers samples on its own realtime thread; a synchronous channel
//! bridges that callback to a tokio task which forwards [`AudioChunk`]s to
//! the recorder. Chunks carry raw interleaved f32 PCM with sample-accurate
//! timestamps; encoding happens at the writer.

use anyhow::{Result, anyhow};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat};
use log::{error, info};
use std::thread;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::types::{AudioChunk, MediaTime, TIMESCALE};

/// Format of the PCM stream a capture delivers, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

pub struct AudioCapture {
    sender: std::sync::mpsc::SyncSender<AudioChunk>,
    sample_rate: u32,
    channels: u16,
    /// Sample frames delivered so far; drives chunk timestamps so long
    /// captures never drift against the sample clock.
    frames_delivered: u64,
}

impl AudioCapture {
    fn write_input_data<T>(&mut self, input: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let mut payload = Vec::with_capacity(input.len() * 4);
        for &sample in input {
            payload.extend_from_slice(&f32::from_sample_(sample).to_le_bytes());
        }

        let pts = MediaTime::from_ticks(
            (self.frames_delivered as i64 * TIMESCALE) / self.sample_rate.max(1) as i64,
        );
        self.frames_delivered += input.len() as u64 / self.channels.max(1) as u64;

        // Non-blocking on purpose: stalling the cpal callback glitches the
        // device. A full channel drops the chunk instead.
        let _ = self.sender.try_send(AudioChunk {
            data: Bytes::from(payload),
            sample_rate: self.sample_rate,
            channels: self.channels,
            pts,
        });
    }

    /// Starts microphone capture and returns the stream format plus a
    /// Tokio channel of PCM chunks.
    ///
    /// The channel closes when the `CancellationToken` is cancelled.
    pub fn start(
        cancel: CancellationToken,
    ) -> Result<(AudioStreamInfo, mpsc::Receiver<AudioChunk>)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device found"))?;
        let config = device
            .default_input_config()
            .map_err(|e| anyhow!("Failed to get default input config: {}", e))?;

        info!("Audio capture config: {:?}", config);

        let sample_rate = config.sample_rate();
        let channels = config.channels();

        // Synchronous channel: cpal callback → bridge task
        let (sync_tx, sync_rx) = std::sync::mpsc::sync_channel::<AudioChunk>(256);

        // Async channel: bridge → recorder
        let (async_tx, async_rx) = mpsc::channel::<AudioChunk>(256);

        // Bridge task: synchronous → asynchronous
        tokio::task::spawn_blocking(move || {
            loop {
                match sync_rx.recv() {
                    Ok(chunk) => {
                        if async_tx.blocking_send(chunk).is_err() {
                            info!("Audio output channel closed");
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Audio capture channel closed");
                        break;
                    }
                }
            }
        });

        // Audio capture thread (cpal requires a dedicated thread)
        let handle = tokio::runtime::Handle::current();
        thread::spawn(move || -> Result<()> {
            let mut capturer = AudioCapture {
                sender: sync_tx,
                sample_rate,
                channels,
                frames_delivered: 0,
            };

            let err_fn = |err| error!("Audio stream error: {}", err);

            let stream = match config.sample_format() {
                SampleFormat::I8 => device.build_input_stream(
                    &config.into(),
                    move |data, _: &_| capturer.write_input_data::<i8>(data),
                    err_fn,
                    None,
                )?,
                SampleFormat::I16 => device.build_input_stream(
                    &config.into(),
                    move |data, _: &_| capturer.write_input_data::<i16>(data),
                    err_fn,
                    None,
                )?,
                SampleFormat::I32 => device.build_input_stream(
                    &config.into(),
                    move |data, _: &_| capturer.write_input_data::<i32>(data),
                    err_fn,
                    None,
                )?,
                SampleFormat::F32 => device.build_input_stream(
                    &config.into(),
                    move |data, _: &_| capturer.write_input_data::<f32>(data),
                    err_fn,
                    None,
                )?,
                other => return Err(anyhow!("Unsupported sample format: {other:?}")),
            };

            stream.play()?;
            info!("Audio capture started");

            // Wait for cancellation
            tokio::task::block_in_place(move || {
                handle.block_on(async move { cancel.cancelled().await });
            });

            stream.pause()?;
            info!("Audio capture stopped");
            Ok(())
        });

        Ok((
            AudioStreamInfo {
                sample_rate,
                channels,
            },
            async_rx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_timestamps_follow_sample_clock() {
        let (tx, rx) = std::sync::mpsc::sync_channel(8);
        let mut capturer = AudioCapture {
            sender: tx,
            sample_rate: 48_000,
            channels: 2,
            frames_delivered: 0,
        };

        // Two callbacks of 480 frames each (10 ms at 48 kHz stereo)
        capturer.write_input_data::<f32>(&[0.0; 960]);
        capturer.write_input_data::<f32>(&[0.0; 960]);

        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first.pts, MediaTime::ZERO);
        // 480 frames at 48 kHz = 10 ms = 6 ticks
        assert_eq!(second.pts, MediaTime::from_ticks(6));
        assert_eq!(second.frame_count(), 480);
    }

    #[test]
    fn test_integer_samples_convert_to_f32() {
        let (tx, rx) = std::sync::mpsc::sync_channel(8);
        let mut capturer = AudioCapture {
            sender: tx,
            sample_rate: 44_100,
            channels: 1,
            frames_delivered: 0,
        };

        capturer.write_input_data::<i16>(&[0, i16::MAX, i16::MIN]);
        let chunk = rx.recv().unwrap();
        let samples: Vec<f32> = chunk.samples().collect();
        assert_eq!(samples.len(), 3);
        assert!(samples[0].abs() < 1e-4);
        assert!((samples[1] - 1.0).abs() < 1e-3);
        assert!((samples[2] + 1.0).abs() < 1e-3);
    }
}
