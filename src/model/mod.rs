pub mod config;
pub mod duration;
pub mod edit;
pub mod song;
