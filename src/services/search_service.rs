use std::collections::BTreeMap;

use crate::models::image::ImageRecord;
use crate::models::search::ImageMatch;

/// Case-insensitive substring search over every text region in `index`.
///
/// Images come back in path order with only their matching regions, in the
/// order the OCR backend reported them. A blank query matches nothing.
pub fn search(query: &str, index: &BTreeMap<String, ImageRecord>) -> Vec<ImageMatch> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let needle = trimmed.to_lowercase();

    index
        .values()
        .filter_map(|record| {
            let matching_regions: Vec<_> = record
                .items
                .iter()
                .filter(|item| item.text.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            if matching_regions.is_empty() {
                return None;
            }
            Some(ImageMatch {
                path: record.path.clone(),
                matching_regions,
                width: record.width,
                height: record.height,
            })
        })
        .collect()
}
