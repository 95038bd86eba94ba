//! Photo and scan capture
//!
//! The camera and file picker belong to the host; the engine talks to them
//! through [`MediaCapture`]. An open camera stream is owned by a
//! [`CameraGuard`], so it is released however the modal is left.

use crate::error::InputError;
use pdf_engine::RgbaImage;
use tracing::{debug, warn};

/// MIME types offered by the file picker.
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg"];

/// A live camera feed.
pub trait CameraStream: Send {
    fn capture_frame(&mut self) -> Result<RgbaImage, InputError>;

    /// Stop the feed. Called exactly once by [`CameraGuard`].
    fn release(&mut self);
}

/// Host access to the file picker and camera.
pub trait MediaCapture {
    /// Let the user pick a file. `Ok(None)` means the picker was dismissed.
    fn open_file(&mut self, accept: &[&str]) -> Result<Option<Vec<u8>>, InputError>;

    fn open_camera(&mut self) -> Result<Box<dyn CameraStream>, InputError>;
}

/// Releases the wrapped stream when dropped.
pub struct CameraGuard {
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraGuard {
    pub fn new(stream: Box<dyn CameraStream>) -> Self {
        Self { stream: Some(stream) }
    }

    pub fn capture_frame(&mut self) -> Result<RgbaImage, InputError> {
        match self.stream.as_mut() {
            Some(stream) => stream.capture_frame(),
            None => Err(InputError::CameraUnavailable("stream already released".to_string())),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            debug!("camera stream released");
        }
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraGuard").field("live", &self.is_live()).finish()
    }
}

/// Camera capture modal: preview, capture, retake, use or cancel.
#[derive(Debug)]
pub struct PhotoModal {
    camera: CameraGuard,
    frame: Option<RgbaImage>,
}

impl PhotoModal {
    pub fn open(capture: &mut dyn MediaCapture) -> Result<Self, InputError> {
        let stream = capture.open_camera()?;
        debug!("camera stream opened");
        Ok(Self { camera: CameraGuard::new(stream), frame: None })
    }

    pub fn capture(&mut self) -> Result<(), InputError> {
        self.frame = Some(self.camera.capture_frame()?);
        Ok(())
    }

    pub fn retake(&mut self) {
        self.frame = None;
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    /// Take the captured frame, closing the camera.
    pub fn use_photo(mut self) -> Result<RgbaImage, InputError> {
        let frame = self.frame.take().ok_or(InputError::NoFrameCaptured)?;
        self.camera.release();
        Ok(frame)
    }

    /// Close without using anything.
    pub fn cancel(self) {
        debug!("photo capture cancelled");
    }
}

/// Pick an image file and decode it.
pub fn pick_image_file(capture: &mut dyn MediaCapture) -> Result<RgbaImage, InputError> {
    let bytes = capture.open_file(ACCEPTED_IMAGE_TYPES)?.ok_or(InputError::NoFileSelected)?;
    decode_image(&bytes)
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, InputError> {
    match image::load_from_memory(bytes) {
        Ok(decoded) => Ok(decoded.to_rgba8()),
        Err(err) => {
            warn!(%err, "image could not be decoded");
            Err(InputError::UnreadableImage(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeStream {
        releases: Arc<AtomicUsize>,
    }

    impl CameraStream for FakeStream {
        fn capture_frame(&mut self) -> Result<RgbaImage, InputError> {
            Ok(RgbaImage::new(8, 6))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeCapture {
        releases: Arc<AtomicUsize>,
        file: Option<Vec<u8>>,
    }

    impl MediaCapture for FakeCapture {
        fn open_file(&mut self, _accept: &[&str]) -> Result<Option<Vec<u8>>, InputError> {
            Ok(self.file.clone())
        }

        fn open_camera(&mut self) -> Result<Box<dyn CameraStream>, InputError> {
            Ok(Box::new(FakeStream { releases: Arc::clone(&self.releases) }))
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::new(3, 2)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn cancel_releases_stream_once() {
        let mut capture = FakeCapture::default();
        let mut modal = PhotoModal::open(&mut capture).expect("camera");
        modal.capture().expect("frame");
        modal.cancel();

        assert_eq!(capture.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn use_photo_returns_frame_and_releases() {
        let mut capture = FakeCapture::default();
        let mut modal = PhotoModal::open(&mut capture).expect("camera");
        modal.capture().expect("frame");

        let frame = modal.use_photo().expect("frame");
        assert_eq!(frame.dimensions(), (8, 6));
        assert_eq!(capture.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn use_without_capture_is_an_input_error() {
        let mut capture = FakeCapture::default();
        let modal = PhotoModal::open(&mut capture).expect("camera");

        assert!(matches!(modal.use_photo(), Err(InputError::NoFrameCaptured)));
        assert_eq!(capture.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_picker_decodes_png() {
        let mut capture = FakeCapture { file: Some(png_bytes()), ..FakeCapture::default() };
        let image = pick_image_file(&mut capture).expect("decode");
        assert_eq!(image.dimensions(), (3, 2));
    }

    #[test]
    fn dismissed_picker_and_garbage_are_input_errors() {
        let mut capture = FakeCapture::default();
        assert!(matches!(pick_image_file(&mut capture), Err(InputError::NoFileSelected)));

        let mut capture =
            FakeCapture { file: Some(b"not an image".to_vec()), ..FakeCapture::default() };
        assert!(matches!(pick_image_file(&mut capture), Err(InputError::UnreadableImage(_))));
    }
}
