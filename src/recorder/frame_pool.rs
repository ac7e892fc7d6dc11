use ac_ffmpeg::codec::video::{PixelFormat, VideoFrame, VideoFrameMut};
use ac_ffmpeg::time::TimeBase;

/// Reusable encoder frames for one recording. A frame handed to the
/// encoder comes back through [`put`](FramePool::put) and is recycled
/// once the encoder drops its reference, so steady-state recording does
/// not allocate per frame.
pub(crate) struct FramePool {
    free: Vec<VideoFrame>,
    width: usize,
    height: usize,
    time_base: TimeBase,
    pixel_format: PixelFormat,
}

/// Upper bound on retained frames; the encoder holds at most a couple
/// of references at a time.
const POOL_CAP: usize = 8;

impl FramePool {
    pub fn new(width: usize, height: usize, time_base: TimeBase, pixel_format: PixelFormat) -> Self {
        Self {
            free: Vec::with_capacity(POOL_CAP),
            width,
            height,
            time_base,
            pixel_format,
        }
    }

    fn alloc(&self) -> VideoFrameMut {
        VideoFrameMut::black(self.pixel_format, self.width, self.height)
            .with_time_base(self.time_base)
    }

    /// Return a frame once the encoder was fed; recycled on a later take.
    #[inline]
    pub fn put(&mut self, frame: VideoFrame) {
        if self.free.len() < POOL_CAP {
            self.free.push(frame);
        }
    }

    /// Get a writable frame, reusing a returned one when the encoder has
    /// released it. Frames still referenced stay pooled for later.
    #[inline]
    pub fn take(&mut self) -> VideoFrameMut {
        let mut still_shared = Vec::new();
        while let Some(frame) = self.free.pop() {
            match frame.try_into_mut() {
                Ok(writable) => {
                    self.free.append(&mut still_shared);
                    return writable;
                }
                Err(frame) => still_shared.push(frame),
            }
        }
        self.free = still_shared;
        self.alloc()
    }
}
