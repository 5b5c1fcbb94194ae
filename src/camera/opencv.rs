use std::path::PathBuf;

use opencv::core::{Mat, Point, Rect, Scalar, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc, videoio};

use crate::storage::RenderMode;

use super::{CameraBackend, CameraError, Capture, FaceDetector, FaceRect, Frame, FrameRenderer};

const MIN_FACE_SIZE: i32 = 30;

impl From<opencv::Error> for CameraError {
    fn from(e: opencv::Error) -> Self {
        CameraError::Vision(e.to_string())
    }
}

fn device_error(e: opencv::Error) -> CameraError {
    CameraError::Device(e.to_string())
}

/// V4L/any-backend cameras with a Haar cascade face detector.
pub struct OpenCvBackend {
    cascade_path: PathBuf,
}

impl OpenCvBackend {
    pub fn new(cascade_path: impl Into<PathBuf>) -> Self {
        Self {
            cascade_path: cascade_path.into(),
        }
    }
}

impl CameraBackend for OpenCvBackend {
    fn open(&self, index: u32) -> Result<Box<dyn Capture>, CameraError> {
        let unavailable = || CameraError::Unavailable { index };

        let device = i32::try_from(index).map_err(|_| unavailable())?;
        let capture = videoio::VideoCapture::new(device, videoio::CAP_ANY).map_err(|e| {
            tracing::debug!(camera = index, error = %e, "open failed");
            unavailable()
        })?;
        if !capture.is_opened().map_err(device_error)? {
            return Err(unavailable());
        }

        Ok(Box::new(OpenCvCapture {
            capture,
            frame: Mat::default(),
        }))
    }

    fn face_detector(&self) -> Result<Box<dyn FaceDetector>, CameraError> {
        let path = self.cascade_path.to_string_lossy();
        let classifier = CascadeClassifier::new(&path)?;
        if classifier.empty()? {
            return Err(CameraError::Vision(format!(
                "no face cascade loaded from {path}"
            )));
        }
        Ok(Box::new(CascadeDetector { classifier }))
    }
}

struct OpenCvCapture {
    capture: videoio::VideoCapture,
    frame: Mat,
}

impl Capture for OpenCvCapture {
    fn grab(&mut self) -> Result<bool, CameraError> {
        self.capture.grab().map_err(device_error)
    }

    fn retrieve(&mut self) -> Result<Frame, CameraError> {
        if !self.capture.retrieve(&mut self.frame, 0).map_err(device_error)? {
            return Err(CameraError::Device("no frame to retrieve".into()));
        }
        mat_to_frame(&self.frame)
    }
}

struct CascadeDetector {
    classifier: CascadeClassifier,
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, CameraError> {
        let image = frame_to_mat(frame)?;

        let mut gray = Mat::default();
        imgproc::cvt_color_def(&image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&gray, &mut equalized)?;

        let mut faces = Vector::<Rect>::new();
        self.classifier.detect_multi_scale(
            &equalized,
            &mut faces,
            1.1,
            3,
            0,
            Size::new(MIN_FACE_SIZE, MIN_FACE_SIZE),
            Size::default(),
        )?;

        Ok(faces
            .iter()
            .map(|r| FaceRect {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
            })
            .collect())
    }
}

pub struct OpenCvRenderer;

impl FrameRenderer for OpenCvRenderer {
    fn annotate(
        &self,
        frame: &Frame,
        faces: &[FaceRect],
        mode: RenderMode,
    ) -> Result<Frame, CameraError> {
        let mut image = frame_to_mat(frame)?;
        for face in faces {
            let center = Point::new(face.x + face.width / 2, face.y + face.height / 2);
            let radius = face.width.max(face.height) / 2;
            match mode {
                RenderMode::Normal => draw_ring(&mut image, center, radius)?,
                RenderMode::Fun => draw_smiley(&mut image, center, radius)?,
            }
        }
        mat_to_frame(&image)
    }

    fn encode_png(&self, frame: &Frame) -> Result<Vec<u8>, CameraError> {
        let image = frame_to_mat(frame)?;
        let mut buf = Vector::<u8>::new();
        let params = Vector::<i32>::new();
        imgcodecs::imencode(".png", &image, &mut buf, &params)?;
        Ok(buf.to_vec())
    }
}

fn draw_ring(image: &mut Mat, center: Point, radius: i32) -> opencv::Result<()> {
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    imgproc::circle(image, center, radius, green, 3, imgproc::LINE_AA, 0)
}

fn draw_smiley(image: &mut Mat, center: Point, radius: i32) -> opencv::Result<()> {
    let yellow = Scalar::new(0.0, 220.0, 255.0, 0.0);
    let black = Scalar::new(0.0, 0.0, 0.0, 0.0);
    let eye = (radius / 8).max(1);
    let offset = radius / 3;

    imgproc::circle(image, center, radius, yellow, imgproc::FILLED, imgproc::LINE_AA, 0)?;
    for dx in [-offset, offset] {
        let at = Point::new(center.x + dx, center.y - offset);
        imgproc::circle(image, at, eye, black, imgproc::FILLED, imgproc::LINE_AA, 0)?;
    }
    imgproc::ellipse(
        image,
        Point::new(center.x, center.y + offset / 2),
        Size::new(radius / 2, radius / 3),
        0.0,
        0.0,
        180.0,
        black,
        (radius / 12).max(1),
        imgproc::LINE_AA,
        0,
    )
}

fn frame_to_mat(frame: &Frame) -> Result<Mat, CameraError> {
    let rows = i32::try_from(frame.height)
        .map_err(|_| CameraError::Vision(format!("frame height {} too large", frame.height)))?;
    let flat = Mat::from_slice(&frame.data)?;
    Ok(flat.reshape(3, rows)?.try_clone()?)
}

fn mat_to_frame(mat: &Mat) -> Result<Frame, CameraError> {
    // a clone is always continuous, which data_bytes requires
    let mat = mat.try_clone()?;
    Ok(Frame {
        width: mat.cols() as u32,
        height: mat.rows() as u32,
        data: mat.data_bytes()?.to_vec(),
    })
}
