pub mod backend;
pub mod config;
pub mod debounce;
pub mod error;
pub mod health;
pub mod model;
