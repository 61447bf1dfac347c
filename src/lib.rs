pub mod cache;
pub mod config;
pub mod models;
pub mod player;
pub mod playlist;
pub mod workers;
