pub mod catalog;
pub mod config;
pub mod events;
pub mod media;
