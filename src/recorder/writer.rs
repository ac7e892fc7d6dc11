//! MP4 output: H.264 video plus AAC audio behind the [`FrameWriter`] seam
//!
//! The drain thread talks to a `FrameWriter` and never to FFmpeg directly,
//! so session logic (queueing, readiness backpressure, finishing) is
//! testable with a mock. [`MuxWriter`] is the real implementation: an
//! encoder fallback chain feeding an MP4 muxer.

use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioEncoder, AudioFrameMut, ChannelLayout};
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::VideoEncoder;
use ac_ffmpeg::codec::{CodecParameters, Encoder};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::fs::File;

use crate::frame::types::ColorGrid;
use crate::pipeline::types::{AudioChunk, MediaTime, TIMESCALE};
use crate::recorder::RecordSettings;
use crate::recorder::frame_pool::FramePool;

/// Sink for a recording session's media. Called from the drain thread only.
pub trait FrameWriter: Send {
    /// Whether the writer can accept another video frame right now. A
    /// pending frame is retried until this turns true, never dropped.
    fn is_ready_for_video(&self) -> bool;

    /// Append one composited frame at the given session-relative time.
    fn write_video(&mut self, pixels: &ColorGrid, pts: MediaTime) -> Result<()>;

    /// Append a chunk of PCM audio.
    fn write_audio(&mut self, chunk: &AudioChunk) -> Result<()>;

    /// Flush encoders and write the container trailer. Called exactly once.
    fn finalize(&mut self) -> Result<()>;
}

/// Encoder fallback chain: hardware encoders first, then software.
/// Tuned for offline recording quality rather than streaming latency.
const ENCODER_CHAIN: &[(&str, &[(&str, &str)])] = &[
    (
        "h264_nvenc",
        &[
            ("preset", "p4"),
            ("rc", "vbr"),
            ("cq", "23"),
            ("b", "8000000"),
            ("g", "120"),
        ],
    ),
    (
        "h264_qsv",
        &[("preset", "medium"), ("b", "8000000"), ("g", "120")],
    ),
    (
        "h264_amf",
        &[
            ("usage", "transcoding"),
            ("quality", "quality"),
            ("b", "8000000"),
            ("g", "120"),
        ],
    ),
    // CPU fallback, always available
    (
        "libx264",
        &[
            ("preset", "medium"),
            ("crf", "20"),
            ("g", "120"),
            ("threads", "0"),
        ],
    ),
];

pub struct MuxWriter {
    muxer: Muxer<File>,
    video: VideoEncoder,
    audio: Option<AacTrack>,
    frame_pool: FramePool,
    width: usize,
    height: usize,
    frames_written: u64,
}

struct AacTrack {
    encoder: AudioEncoder,
    stream_index: usize,
    sample_rate: u32,
    channels: usize,
    /// Interleaved f32 samples not yet wrapped into an encoder frame
    pending: Vec<f32>,
    /// Sample frames already handed to the encoder, drives audio pts
    frames_sent: i64,
}

impl MuxWriter {
    /// Open the output file and build the encoder/muxer graph.
    ///
    /// Removes a stale file at the target path; any failure here is fatal
    /// to the recording attempt and surfaces before the first frame.
    pub fn create(settings: &RecordSettings) -> Result<Self> {
        let path = &settings.path;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create output directory {}", parent.display()))?;
        }
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Cannot replace stale file {}", path.display()))?;
        }

        let width = settings.width & !1;
        let height = settings.height & !1;
        let time_base = TimeBase::new(1, TIMESCALE as i32);
        let pixel_format = get_pixel_format("yuv420p");

        let video = Self::build_video_encoder(width, height, time_base, pixel_format)?;

        let audio = match settings.audio {
            Some(info) => Some(AacTrack::new(info.sample_rate, info.channels as usize)?),
            None => None,
        };

        let output_format = OutputFormat::guess_from_file_name(
            path.to_str().unwrap_or_default(),
        )
        .or_else(|| OutputFormat::find_by_name("mp4"))
        .ok_or_else(|| anyhow!("No MP4 muxer available"))?;

        let file = File::create(path)
            .with_context(|| format!("Cannot create output file {}", path.display()))?;
        let io = IO::from_seekable_write_stream(file);

        let mut muxer_builder = Muxer::builder();
        let video_params: CodecParameters = video.codec_parameters().into();
        muxer_builder.add_stream(&video_params)?;
        if let Some(track) = &audio {
            let audio_params: CodecParameters = track.encoder.codec_parameters().into();
            muxer_builder.add_stream(&audio_params)?;
        }
        let muxer = muxer_builder.build(io, output_format)?;

        info!(
            "Recording to {} at {}x{}{}",
            path.display(),
            width,
            height,
            if audio.is_some() { " with audio" } else { "" }
        );

        Ok(Self {
            muxer,
            video,
            audio,
            frame_pool: FramePool::new(width, height, time_base, pixel_format),
            width,
            height,
            frames_written: 0,
        })
    }

    fn build_video_encoder(
        w: usize,
        h: usize,
        time_base: TimeBase,
        pixel_format: ac_ffmpeg::codec::video::frame::PixelFormat,
    ) -> Result<VideoEncoder> {
        for (codec, options) in ENCODER_CHAIN {
            let mut builder = match VideoEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    debug!("Encoder {} not available, skipping: {}", codec, e);
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(w)
                .height(h)
                .time_base(time_base);
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            match builder.build() {
                Ok(enc) => {
                    info!("Using encoder: {}", codec);
                    return Ok(enc);
                }
                Err(e) => {
                    debug!("Encoder {} failed to initialize: {}", codec, e);
                    continue;
                }
            }
        }
        Err(anyhow!(
            "No H.264 encoder available, install FFmpeg with at least libx264 support"
        ))
    }

    fn drain_video_packets(&mut self) -> Result<()> {
        while let Some(packet) = self.video.take()? {
            self.muxer.push(packet.with_stream_index(0))?;
        }
        Ok(())
    }

    fn drain_audio_packets(&mut self) -> Result<()> {
        if let Some(track) = &mut self.audio {
            while let Some(packet) = track.encoder.take()? {
                self.muxer.push(packet.with_stream_index(track.stream_index))?;
            }
        }
        Ok(())
    }
}

impl FrameWriter for MuxWriter {
    fn is_ready_for_video(&self) -> bool {
        // FFmpeg encoders accept input as fast as we can feed them; the
        // readiness protocol exists for writers that cannot.
        true
    }

    fn write_video(&mut self, pixels: &ColorGrid, pts: MediaTime) -> Result<()> {
        let mut frame = self.frame_pool.take();
        let time_base = frame.time_base();

        let (w, h) = (self.width, self.height);
        let mut y_buf = vec![0u8; w * h];
        let mut u_buf = vec![0u8; (w / 2) * (h / 2)];
        let mut v_buf = vec![0u8; (w / 2) * (h / 2)];
        bgra_to_yuv420p(
            pixels, w, h, &mut y_buf, w, &mut u_buf, w / 2, &mut v_buf, w / 2,
        );

        // Encoder planes can carry alignment padding, so copy row by row
        // against each plane's own line size.
        {
            let mut planes = frame.planes_mut();
            let y_plane = planes[0].data_mut();
            let y_line = y_plane.len() / h;
            copy_plane(&y_buf, w, h, y_plane, y_line);
        }
        {
            let mut planes = frame.planes_mut();
            let u_plane = planes[1].data_mut();
            let u_line = u_plane.len() / (h / 2);
            copy_plane(&u_buf, w / 2, h / 2, u_plane, u_line);
        }
        {
            let mut planes = frame.planes_mut();
            let v_plane = planes[2].data_mut();
            let v_line = v_plane.len() / (h / 2);
            copy_plane(&v_buf, w / 2, h / 2, v_plane, v_line);
        }

        let frame = frame
            .with_pts(Timestamp::new(pts.ticks, time_base))
            .freeze();
        self.video.push(frame.clone())?;
        self.frame_pool.put(frame);

        self.drain_video_packets()?;
        self.frames_written += 1;
        Ok(())
    }

    fn write_audio(&mut self, chunk: &AudioChunk) -> Result<()> {
        let Some(track) = &mut self.audio else {
            return Ok(());
        };
        track.pending.extend(chunk.samples());

        let spf = track
            .encoder
            .samples_per_frame()
            .unwrap_or(1024);
        while track.pending.len() >= spf * track.channels {
            let batch: Vec<f32> = track.pending.drain(..spf * track.channels).collect();
            track.push_planar(&batch, spf)?;
        }
        self.drain_audio_packets()
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(track) = &mut self.audio {
            track.flush_pending()?;
            track.encoder.flush()?;
        }
        self.drain_audio_packets()?;

        self.video.flush()?;
        self.drain_video_packets()?;

        self.muxer.flush()?;
        info!("Recording finalized, {} frames written", self.frames_written);
        Ok(())
    }
}

impl AacTrack {
    fn new(sample_rate: u32, channels: usize) -> Result<Self> {
        let encoder = AudioEncoder::builder("aac")?
            .sample_rate(sample_rate)
            .channel_layout(
                ChannelLayout::from_channels(channels as u32)
                    .ok_or_else(|| anyhow!("Unsupported channel count: {channels}"))?,
            )
            .sample_format(get_sample_format("fltp"))
            .set_option("b", "160000")
            .build()?;
        Ok(Self {
            encoder,
            // Video is always stream 0; audio registers second
            stream_index: 1,
            sample_rate,
            channels,
            pending: Vec::new(),
            frames_sent: 0,
        })
    }

    /// Wrap `spf` interleaved sample frames into a planar encoder frame.
    fn push_planar(&mut self, interleaved: &[f32], spf: usize) -> Result<()> {
        let params = self.encoder.codec_parameters();
        let mut frame = AudioFrameMut::silence(
            params.channel_layout(),
            params.sample_format(),
            params.sample_rate(),
            spf,
        )
        .with_time_base(TimeBase::new(1, self.sample_rate as i32));

        for (ch, plane) in frame.planes_mut().iter_mut().enumerate().take(self.channels) {
            let data = plane.data_mut();
            for i in 0..spf {
                let sample = interleaved[i * self.channels + ch];
                let bytes = sample.to_le_bytes();
                data[i * 4..i * 4 + 4].copy_from_slice(&bytes);
            }
        }

        let frame = frame.with_pts(Timestamp::new(
            self.frames_sent,
            TimeBase::new(1, self.sample_rate as i32),
        ));
        self.frames_sent += spf as i64;
        self.encoder.push(frame.freeze())?;
        Ok(())
    }

    /// Pad the tail with silence so no captured audio is lost.
    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let spf = self.encoder.samples_per_frame().unwrap_or(1024);
        let mut tail = std::mem::take(&mut self.pending);
        tail.resize(spf * self.channels, 0.0);
        self.push_planar(&tail, spf)
    }
}

/// Copy a tightly-packed plane into an encoder plane with line padding.
fn copy_plane(source: &[u8], width: usize, rows: usize, destination: &mut [u8], line_size: usize) {
    if line_size == width && destination.len() >= source.len() {
        destination[..source.len()].copy_from_slice(source);
        return;
    }
    for r in 0..rows {
        let dst_start = r * line_size;
        if dst_start + width > destination.len() {
            break;
        }
        destination[dst_start..dst_start + width].copy_from_slice(&source[r * width..][..width]);
    }
}

/// BGRA to planar YUV 4:2:0, BT.601 limited range. Chroma is averaged over
/// each 2x2 block.
#[allow(clippy::too_many_arguments)]
pub(crate) fn bgra_to_yuv420p(
    pixels: &ColorGrid,
    width: usize,
    height: usize,
    y_plane: &mut [u8],
    y_line: usize,
    u_plane: &mut [u8],
    u_line: usize,
    v_plane: &mut [u8],
    v_line: usize,
) {
    for row in 0..height {
        for col in 0..width {
            let p = pixels.get(col, row).unwrap_or_default();
            let (r, g, b) = (p.r as i32, p.g as i32, p.b as i32);
            let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[row * y_line + col] = y.clamp(0, 255) as u8;
        }
    }

    for row in (0..height).step_by(2) {
        for col in (0..width).step_by(2) {
            let mut r_sum = 0i32;
            let mut g_sum = 0i32;
            let mut b_sum = 0i32;
            let mut count = 0i32;
            for dy in 0..2 {
                for dx in 0..2 {
                    if let Some(p) = pixels.get(col + dx, row + dy) {
                        r_sum += p.r as i32;
                        g_sum += p.g as i32;
                        b_sum += p.b as i32;
                        count += 1;
                    }
                }
            }
            let (r, g, b) = (r_sum / count.max(1), g_sum / count.max(1), b_sum / count.max(1));
            let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
            let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
            u_plane[(row / 2) * u_line + col / 2] = u.clamp(0, 255) as u8;
            v_plane[(row / 2) * v_line + col / 2] = v.clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::types::Bgra;

    fn convert(grid: &ColorGrid) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let (w, h) = grid.resolution();
        let mut y = vec![0u8; w * h];
        let mut u = vec![0u8; (w / 2) * (h / 2)];
        let mut v = vec![0u8; (w / 2) * (h / 2)];
        bgra_to_yuv420p(grid, w, h, &mut y, w, &mut u, w / 2, &mut v, w / 2);
        (y, u, v)
    }

    #[test]
    fn test_black_maps_to_video_range_floor() {
        let grid = ColorGrid::filled(4, 4, Bgra::BLACK);
        let (y, u, v) = convert(&grid);
        assert!(y.iter().all(|&s| s == 16));
        assert!(u.iter().all(|&s| s == 128));
        assert!(v.iter().all(|&s| s == 128));
    }

    #[test]
    fn test_white_maps_to_video_range_ceiling() {
        let grid = ColorGrid::filled(4, 4, Bgra::new(255, 255, 255, 255));
        let (y, u, v) = convert(&grid);
        assert!(y.iter().all(|&s| s == 235));
        assert!(u.iter().all(|&s| (s as i32 - 128).abs() <= 1));
        assert!(v.iter().all(|&s| (s as i32 - 128).abs() <= 1));
    }

    #[test]
    fn test_pure_green_has_low_chroma() {
        // The chroma-key color must stay far from neutral gray in U/V
        let grid = ColorGrid::filled(4, 4, Bgra::new(0, 255, 0, 255));
        let (y, u, v) = convert(&grid);
        assert!(y[0] > 128, "green is bright: y={}", y[0]);
        assert!(u[0] < 64, "green pulls U down: u={}", u[0]);
        assert!(v[0] < 64, "green pulls V down: v={}", v[0]);
    }

    #[test]
    fn test_chroma_averages_2x2_block() {
        let mut grid = ColorGrid::new(2, 2);
        grid.set(0, 0, Bgra::new(255, 0, 0, 255));
        grid.set(1, 0, Bgra::new(0, 0, 255, 255));
        grid.set(0, 1, Bgra::new(255, 0, 0, 255));
        grid.set(1, 1, Bgra::new(0, 0, 255, 255));
        let (_, u, v) = convert(&grid);
        // Half blue, half red averages toward neutral
        let mut u2 = vec![0u8; 1];
        let mut v2 = vec![0u8; 1];
        let mut y2 = vec![0u8; 4];
        let avg = ColorGrid::filled(2, 2, Bgra::new(127, 0, 127, 255));
        bgra_to_yuv420p(&avg, 2, 2, &mut y2, 2, &mut u2, 1, &mut v2, 1);
        assert!((u[0] as i32 - u2[0] as i32).abs() <= 2);
        assert!((v[0] as i32 - v2[0] as i32).abs() <= 2);
    }
}
