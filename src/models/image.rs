use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Location {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn is_well_formed(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite())
            && self.left <= self.right
            && self.top <= self.bottom
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub location: Location,
}

/// Parsed body of a successful OCR backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub width: f64,
    pub height: f64,
    pub items: Vec<TextRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    /// Modification time (ms since epoch) of the file when it was sent to OCR.
    pub fingerprint: i64,
    pub width: f64,
    pub height: f64,
    pub items: Vec<TextRegion>,
    pub indexed_at: String,
}

impl ImageRecord {
    pub fn from_ocr(path: &str, fingerprint: i64, result: OcrResult) -> Self {
        Self {
            path: path.to_string(),
            fingerprint,
            width: result.width,
            height: result.height,
            items: result.items,
            indexed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
