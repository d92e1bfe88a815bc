//! Async filesystem primitives

pub mod dir;
pub mod file;
