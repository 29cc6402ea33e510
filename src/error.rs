use std::io;

use thiserror::Error;

/// Hard ceiling on the double-array allocation, in slots.
pub const MAX_SLOTS: usize = (i32::MAX as f64 * 0.95) as usize;

/// Errors surfaced by automaton construction and (de)serialization.
///
/// Search never fails: its inputs are slices and its outputs are values.
#[derive(Debug, Error)]
pub enum Error {
    /// The double-array would need more than [`MAX_SLOTS`] slots.
    #[error("double-array capacity exhausted: {requested} slots requested (limit {})", MAX_SLOTS)]
    CapacityExhausted { requested: usize },

    /// The input stream is not a well-formed serialized automaton.
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// A cancellation token fired during save or load.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying stream failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_the_limit() {
        let err = Error::CapacityExhausted { requested: usize::MAX };
        assert!(err.to_string().contains(&MAX_SLOTS.to_string()));
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
