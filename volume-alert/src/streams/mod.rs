/// Idle read timeout stream wrapper.
pub mod timeout;
