//! The text format machines exchange.
//!
//! A message reads `[machine <id>, task <code>] the time is <clock>`. Only the
//! trailing clock value means anything to the receiver; the rest is there for
//! whoever reads the logs.

use thiserror::Error as ThisError;

/// The largest number of bytes sent or read in one socket operation.
pub const FRAME_SIZE: usize = 64;

/// Builds the payload a machine sends for a send task.
pub fn format_message(machine_id: usize, task_code: u8, clock: u64) -> String {
    format!("[machine {machine_id}, task {task_code}] the time is {clock}")
}

/// Extracts the sender's clock value from a received payload.
///
/// `u64::MAX` is refused: no clock can merge it and still advance.
pub fn parse_clock(message: &str) -> Result<u64, ParseError> {
    let token = message
        .split_whitespace()
        .next_back()
        .ok_or(ParseError::Empty)?;
    match token.parse() {
        Ok(clock) if clock < u64::MAX => Ok(clock),
        _ => Err(ParseError::InvalidClock(token.to_string())),
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("The message is empty")]
    Empty,
    #[error("Expected a clock value at the end of the message but got {0:?}")]
    InvalidClock(String),
}
