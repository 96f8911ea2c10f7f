pub mod attributes;
pub mod capabilities;
pub mod state;
