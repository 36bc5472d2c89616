pub mod indexing_commands;
pub mod search_commands;
