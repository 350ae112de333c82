//! Live capture loop state, independent of any camera or UI.

use crate::detector::FaceDetector;
use crate::recognizer::{Recognition, Recognizer, RecognizerError};
use image::imageops;
use image::RgbImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Start,
    Stop,
    FrameArrived(RgbImage),
    /// The frame source failed to deliver a frame.
    FrameFailed(String),
}

/// Drives a recognizer from a stream of capture events.
///
/// Frames are only recognized while capturing. A failed read or a failed
/// recognition stops the session; the caller restarts it with
/// [`CaptureEvent::Start`].
pub struct CaptureSession<'r, D> {
    recognizer: &'r Recognizer<D>,
    state: CaptureState,
    mirror: bool,
    frames: u64,
}

impl<'r, D: FaceDetector> CaptureSession<'r, D> {
    /// New idle session. Frames are mirrored horizontally by default.
    pub fn new(recognizer: &'r Recognizer<D>) -> Self {
        Self {
            recognizer,
            state: CaptureState::Idle,
            mirror: true,
            frames: 0,
        }
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Frames recognized since the session was created.
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Apply one event. Returns the recognition for frames handled while
    /// capturing, `None` otherwise.
    pub fn handle(&mut self, event: CaptureEvent) -> Result<Option<Recognition>, RecognizerError> {
        match (self.state, event) {
            (CaptureState::Idle, CaptureEvent::Start) => {
                tracing::info!("capture started");
                self.state = CaptureState::Capturing;
                Ok(None)
            }
            (CaptureState::Capturing, CaptureEvent::Stop) => {
                tracing::info!(frames = self.frames, "capture stopped");
                self.state = CaptureState::Idle;
                Ok(None)
            }
            (CaptureState::Capturing, CaptureEvent::FrameFailed(reason)) => {
                tracing::warn!(%reason, "frame read failed; capture stopped");
                self.state = CaptureState::Idle;
                Ok(None)
            }
            (CaptureState::Capturing, CaptureEvent::FrameArrived(frame)) => {
                let frame = if self.mirror {
                    imageops::flip_horizontal(&frame)
                } else {
                    frame
                };
                self.frames += 1;
                match self.recognizer.recognize(&frame) {
                    Ok(recognition) => Ok(Some(recognition)),
                    Err(e) => {
                        tracing::warn!(error = %e, "recognition failed; capture stopped");
                        self.state = CaptureState::Idle;
                        Err(e)
                    }
                }
            }
            (CaptureState::Idle, CaptureEvent::FrameArrived(_)) => {
                tracing::trace!("frame dropped while idle");
                Ok(None)
            }
            // Start while capturing, Stop or FrameFailed while idle.
            _ => Ok(None),
        }
    }
}
