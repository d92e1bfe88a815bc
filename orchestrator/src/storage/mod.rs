//! Persistent state layout

pub mod layout;
pub mod release;
