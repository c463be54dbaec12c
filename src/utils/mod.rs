//! Utility Module
//!
//! - [`FpsCounter`]: frame rate measurement over one-second windows

pub mod fps_counter;

pub use fps_counter::FpsCounter;
