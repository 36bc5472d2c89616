pub mod file_entry;
pub mod image;
pub mod search;
