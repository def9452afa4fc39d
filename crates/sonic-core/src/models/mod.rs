//! Data models for Sonic

mod alert;
mod position;

pub use alert::*;
pub use position::*;
