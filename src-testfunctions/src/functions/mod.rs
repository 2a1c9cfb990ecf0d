//! Test function modules grouped by landscape character

mod multimodal;
mod unimodal;

pub use multimodal::*;
pub use unimodal::*;
