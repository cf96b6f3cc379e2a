//!
//! Protocol sessions which implement [`crate::comm::Transport`].
pub use binrw;

/// Modbus communication
pub mod modbus;
