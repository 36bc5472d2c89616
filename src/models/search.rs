use serde::{Deserialize, Serialize};

use crate::models::image::TextRegion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub path: String,
    pub matching_regions: Vec<TextRegion>,
    pub width: f64,
    pub height: f64,
}

/// A matched region scaled onto the size an image is displayed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightBox {
    pub text: String,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ImageMatch {
    pub fn file_name(&self) -> &str {
        self.path.rsplit(['/', '\\']).next().unwrap_or(&self.path)
    }

    pub fn preview(&self) -> Option<&str> {
        self.matching_regions.first().map(|r| r.text.as_str())
    }

    /// Projects matched regions from natural pixel space onto a display size.
    /// Returns nothing when the natural dimensions are unknown (zero).
    pub fn project(&self, display_width: f64, display_height: f64) -> Vec<HighlightBox> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Vec::new();
        }
        let scale_x = display_width / self.width;
        let scale_y = display_height / self.height;

        self.matching_regions
            .iter()
            .map(|region| {
                let loc = &region.location;
                HighlightBox {
                    text: region.text.clone(),
                    left: loc.left * scale_x,
                    top: loc.top * scale_y,
                    width: loc.width() * scale_x,
                    height: loc.height() * scale_y,
                }
            })
            .collect()
    }
}
