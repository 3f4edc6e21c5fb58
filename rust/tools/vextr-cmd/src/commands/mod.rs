//! Command implementations for vextr-cmd

pub mod ping_pong;
pub mod sleepers;
pub mod strings;
pub mod vector;
