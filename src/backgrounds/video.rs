// SPDX-License-Identifier: GPL-3.0-only

//! Animated backgrounds decoded into timed frames
//!
//! Playback loops; the frame shown is chosen from the time elapsed since the
//! background was loaded.

use crate::errors::{FilterError, FilterResult};
use crate::media::Picture;
use image::AnimationDecoder;
use image::codecs::gif::GifDecoder;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Frames shorter than this are shown for this long
const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct VideoBackground {
    frames: Vec<(Picture, Duration)>,
    duration: Duration,
}

impl VideoBackground {
    /// Decode an animated GIF
    pub fn decode(bytes: &[u8]) -> FilterResult<Self> {
        let decoder = GifDecoder::new(Cursor::new(bytes))?;
        let frames = decoder.into_frames().collect_frames()?;

        let frames: Vec<(Picture, Duration)> = frames
            .into_iter()
            .map(|frame| {
                let delay = Duration::from(frame.delay()).max(MIN_FRAME_DELAY);
                (Arc::new(frame.into_buffer()), delay)
            })
            .collect();
        Self::from_frames(frames)
    }

    pub fn from_frames(frames: Vec<(Picture, Duration)>) -> FilterResult<Self> {
        if frames.is_empty() {
            return Err(FilterError::BackgroundLoad(
                "animated background has no frames".into(),
            ));
        }
        let duration = frames.iter().map(|(_, delay)| *delay).sum();
        Ok(Self { frames, duration })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Length of one loop
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Index and picture of the frame shown after `elapsed`
    pub fn frame_at(&self, elapsed: Duration) -> (usize, &Picture) {
        let loop_nanos = self.duration.as_nanos().max(1);
        let mut position = elapsed.as_nanos() % loop_nanos;
        for (index, (picture, delay)) in self.frames.iter().enumerate() {
            let delay = delay.as_nanos();
            if position < delay {
                return (index, picture);
            }
            position -= delay;
        }
        let last = self.frames.len() - 1;
        (last, &self.frames[last].0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame as AnimationFrame, Rgba, RgbaImage};

    fn picture(value: u8) -> Picture {
        Arc::new(RgbaImage::from_pixel(2, 2, Rgba([value, 0, 0, 255])))
    }

    #[test]
    fn test_frame_at_loops() {
        let video = VideoBackground::from_frames(vec![
            (picture(1), Duration::from_millis(100)),
            (picture(2), Duration::from_millis(50)),
        ])
        .unwrap();

        assert_eq!(video.duration(), Duration::from_millis(150));
        assert_eq!(video.frame_at(Duration::ZERO).0, 0);
        assert_eq!(video.frame_at(Duration::from_millis(120)).0, 1);
        assert_eq!(video.frame_at(Duration::from_millis(160)).0, 0);
    }

    #[test]
    fn test_decode_gif() {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            let frames = [10u8, 200].map(|value| {
                AnimationFrame::from_parts(
                    RgbaImage::from_pixel(4, 3, Rgba([value, value, value, 255])),
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                )
            });
            encoder.encode_frames(frames).unwrap();
        }

        let video = VideoBackground::decode(&bytes).unwrap();
        assert_eq!(video.frame_count(), 2);
        assert_eq!(video.frame_at(Duration::ZERO).1.dimensions(), (4, 3));
        assert_eq!(video.duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(VideoBackground::decode(b"not a gif").is_err());
    }
}
