use crate::models::search::ImageMatch;
use crate::services::search_service;
use crate::state::AppState;

/// Searches the index as it is right now; later writes do not affect the result.
pub fn search(state: &AppState, query: &str) -> Vec<ImageMatch> {
    let snapshot = state.store.snapshot();
    search_service::search(query, &snapshot)
}
