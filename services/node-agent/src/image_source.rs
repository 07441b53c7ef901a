//! Image source interface and a synthetic implementation.
//!
//! The image source abstracts the camera:
//! - Measuring the fraction of changed pixels in a fresh frame
//! - Producing an encoded frame of a requested image type
//! - Grabbing (and discarding) frames to flush stale camera buffers
//!
//! A synthetic implementation is provided for running without a camera.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;
use vsn_proto::ImageType;

/// Errors raised by an image source.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageSourceError {
    /// The capture device could not be opened or has gone away.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A frame could not be captured.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// A frame could not be encoded.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// The reported active-pixel fraction is not a finite number.
    #[error("invalid reading: {0}")]
    InvalidReading(f32),
}

/// Camera interface used by the control loop.
#[async_trait]
pub trait ImageSource: Send {
    /// Capture a new frame and return the fraction of active pixels in `[0, 1]`.
    async fn capture_percentage_of_active_pixels(&mut self) -> Result<f32, ImageSourceError>;

    /// Encode the most recent frame as `image_type`.
    async fn capture_encoded_frame(&mut self, image_type: ImageType)
        -> Result<Bytes, ImageSourceError>;

    /// Grab and discard `count` frames.
    async fn grab_frames(&mut self, count: u32) -> Result<(), ImageSourceError>;
}

/// Image source producing a deterministic activity pattern.
///
/// Each cycle idles for `quiet_ticks` readings near zero, then ramps up and
/// back down over `burst_ticks` readings, peaking at `peak`.
pub struct SyntheticImageSource {
    step: u64,
    quiet_ticks: u64,
    burst_ticks: u64,
    peak: f32,
    frame_len: usize,
    frames_grabbed: u64,
}

impl SyntheticImageSource {
    /// Create a synthetic source with a one-in-four burst cycle.
    pub fn new() -> Self {
        Self {
            step: 0,
            quiet_ticks: 15,
            burst_ticks: 5,
            peak: 0.6,
            frame_len: 4096,
            frames_grabbed: 0,
        }
    }

    /// Reading for a given step of the cycle.
    fn reading_at(&self, step: u64) -> f32 {
        let cycle = self.quiet_ticks + self.burst_ticks;
        let phase = step % cycle.max(1);

        if phase < self.quiet_ticks || self.burst_ticks == 0 {
            return 0.01;
        }

        let pos = (phase - self.quiet_ticks) as f32;
        let half = self.burst_ticks as f32 / 2.0;
        let ramp = 1.0 - ((pos + 0.5) - half).abs() / half;
        (self.peak * ramp).clamp(0.0, 1.0)
    }

    /// Total frames grabbed for flushing.
    pub fn frames_grabbed(&self) -> u64 {
        self.frames_grabbed
    }
}

impl Default for SyntheticImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for SyntheticImageSource {
    async fn capture_percentage_of_active_pixels(&mut self) -> Result<f32, ImageSourceError> {
        let reading = self.reading_at(self.step);
        self.step += 1;
        Ok(reading)
    }

    async fn capture_encoded_frame(
        &mut self,
        image_type: ImageType,
    ) -> Result<Bytes, ImageSourceError> {
        // Placeholder payload: 4-byte tag, image type, step, then filler.
        let mut buf = BytesMut::with_capacity(self.frame_len);
        buf.put_slice(b"VSNF");
        buf.put_u8(image_type.as_u8());
        buf.put_u64(self.step);
        buf.resize(self.frame_len.max(buf.len()), 0);

        debug!(image_type = %image_type, len = buf.len(), "[SYNTHETIC] Encoded frame");
        Ok(buf.freeze())
    }

    async fn grab_frames(&mut self, count: u32) -> Result<(), ImageSourceError> {
        self.frames_grabbed += u64::from(count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_readings_stay_in_range() {
        let mut source = SyntheticImageSource::new();
        for _ in 0..100 {
            let reading = source.capture_percentage_of_active_pixels().await.unwrap();
            assert!((0.0..=1.0).contains(&reading));
        }
    }

    #[tokio::test]
    async fn test_synthetic_cycle_has_quiet_and_burst() {
        let mut source = SyntheticImageSource::new();
        let mut readings = Vec::new();
        for _ in 0..20 {
            readings.push(source.capture_percentage_of_active_pixels().await.unwrap());
        }

        assert!(readings[..15].iter().all(|r| *r < 0.1));
        assert!(readings[15..].iter().any(|r| *r > 0.3));
    }

    #[tokio::test]
    async fn test_synthetic_frame_carries_image_type() {
        let mut source = SyntheticImageSource::new();
        let frame = source.capture_encoded_frame(ImageType::Raw).await.unwrap();

        assert_eq!(&frame[..4], b"VSNF");
        assert_eq!(frame[4], ImageType::Raw.as_u8());
        assert_eq!(frame.len(), 4096);
    }

    #[tokio::test]
    async fn test_grab_frames_counts() {
        let mut source = SyntheticImageSource::new();
        source.grab_frames(5).await.unwrap();
        source.grab_frames(3).await.unwrap();
        assert_eq!(source.frames_grabbed(), 8);
    }
}
