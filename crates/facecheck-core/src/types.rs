use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of every [`NormalizedFace`].
pub const CANONICAL_FACE_SIZE: u32 = 256;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("face region {region:?} does not fit a {width}x{height} image")]
    InvalidRegion {
        region: FaceRegion,
        width: u32,
        height: u32,
    },
}

/// Row-major grid of 8-bit samples with interleaved channels.
///
/// A matrix may be empty (zero width or height); every pipeline stage
/// rejects empty input with [`ImageError::InvalidImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMatrix {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl PixelMatrix {
    /// Wrap a sample buffer. Fails when the buffer length does not match
    /// `width * height * channels` or `channels` is zero.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, ImageError> {
        if channels == 0 {
            return Err(ImageError::InvalidImage("channel count is zero".into()));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(ImageError::InvalidImage(format!(
                "expected {expected} samples for {width}x{height}x{channels}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Single-channel matrix from a grayscale buffer.
    pub fn gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, ImageError> {
        Self::new(data, width, height, 1)
    }

    /// Single-channel matrix with every sample set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; width as usize * height as usize],
            width,
            height,
            channels: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_gray(&self) -> bool {
        self.channels == 1
    }

    /// Sample at `(x, y)` of a single-channel matrix.
    #[inline]
    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// All channel samples of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.data[start..start + c]
    }
}

/// Axis-aligned face rectangle in the coordinate space of a source matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the region is non-degenerate and lies inside a
    /// `width` x `height` matrix.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }

    /// Intersect a possibly out-of-bounds rectangle with the image bounds.
    /// Returns `None` when nothing of it remains inside.
    pub fn clamped(x: i64, y: i64, width: i64, height: i64, bounds_w: u32, bounds_h: u32) -> Option<Self> {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width).min(bounds_w as i64);
        let y1 = (y + height).min(bounds_h as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// A 256x256 single-channel face crop stretched to the full 0–255 range.
///
/// The only input the similarity ensemble accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFace(PixelMatrix);

impl NormalizedFace {
    pub fn matrix(&self) -> &PixelMatrix {
        &self.0
    }

    pub fn pixels(&self) -> &[u8] {
        self.0.data()
    }

    pub fn size(&self) -> u32 {
        CANONICAL_FACE_SIZE
    }
}

impl TryFrom<PixelMatrix> for NormalizedFace {
    type Error = ImageError;

    fn try_from(matrix: PixelMatrix) -> Result<Self, Self::Error> {
        if matrix.width() != CANONICAL_FACE_SIZE
            || matrix.height() != CANONICAL_FACE_SIZE
            || !matrix.is_gray()
        {
            return Err(ImageError::InvalidImage(format!(
                "normalized face must be {CANONICAL_FACE_SIZE}x{CANONICAL_FACE_SIZE}x1, got {}x{}x{}",
                matrix.width(),
                matrix.height(),
                matrix.channels()
            )));
        }
        Ok(Self(matrix))
    }
}

/// The three independent similarity signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// LBPH distance after one-shot training on the reference face.
    Learned,
    /// Pearson correlation of 256-bin intensity histograms.
    HistogramCorrelation,
    /// Peak normalized correlation coefficient of probe against reference.
    TemplateMatch,
}

/// One method's raw score and its verdict against the method threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodScore {
    pub method: Method,
    pub value: f64,
    pub passed: bool,
}

/// Outcome of a single verification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub subject_id: String,
    pub is_match: bool,
    /// Empty when a face could not be located in either image.
    pub scores: Vec<MethodScore>,
}

impl VerificationResult {
    /// Definitive non-match for a detection miss.
    pub fn no_face(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            is_match: false,
            scores: Vec::new(),
        }
    }

    pub fn score(&self, method: Method) -> Option<&MethodScore> {
        self.scores.iter().find(|s| s.method == method)
    }

    pub fn passed_count(&self) -> usize {
        self.scores.iter().filter(|s| s.passed).count()
    }
}
