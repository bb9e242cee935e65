pub mod config;
pub mod lyrics;
pub mod platform;
pub mod protocol;
pub mod queue;
pub mod state;
pub mod track;
