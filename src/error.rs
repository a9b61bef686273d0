//! Error types and Result alias for RustSVF
//!
//! Every fallible public operation returns one of the typed errors below.
//! No operation retries internally and no error leaves a sparse virtual
//! file in a partially mutated state: a rejected write commits nothing, a
//! failed read fills nothing.

use std::fmt;

use crate::types::FilePos;

/// Why a read request could not be satisfied by a single resident block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The file holds no blocks at all
    Empty,
    /// The request starts before the first resident block
    BeforeFirst {
        /// File position of the first resident block
        first: FilePos,
    },
    /// The request starts inside a block but extends past its end
    Overruns {
        /// Starting position of the containing block
        block_fpos: FilePos,
        /// Size of the containing block
        block_size: usize,
    },
    /// The request starts in the gap after a block
    Gap {
        /// Starting position of the preceding block
        block_fpos: FilePos,
        /// Size of the preceding block
        block_size: usize,
    },
}

/// Errors raised by sparse virtual file and container operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An overlapping write carried a byte that differs from resident data
    Diff {
        /// Position of the first differing byte
        file_position: FilePos,
        /// The byte already held
        existing: u8,
        /// The byte the write carried
        incoming: u8,
    },
    /// A read request not fully contained in a single resident block
    Read {
        kind: ReadError,
        file_position: FilePos,
        length: usize,
    },
    /// No block starts exactly at the given position
    Erase { file_position: FilePos },
    /// The container holds no file with this identifier
    NotFound { id: String },
    /// The container already holds a file with this identifier
    AlreadyExists { id: String },
    /// Internal invariant violation, reserved for defensive checks
    Internal { message: String },
}

impl Error {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

fn byte_literal(b: u8) -> String {
    format!("x'{}'", hex::encode([b]))
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Diff {
                file_position,
                existing,
                incoming,
            } => write!(
                f,
                "write(): difference at position {}: existing {} != incoming {}",
                file_position,
                byte_literal(*existing),
                byte_literal(*incoming)
            ),
            Error::Read {
                kind,
                file_position,
                length,
            } => {
                write!(
                    f,
                    "read(): can not read length {} at position {}: ",
                    length, file_position
                )?;
                match kind {
                    ReadError::Empty => write!(f, "no blocks held"),
                    ReadError::BeforeFirst { first } => {
                        write!(f, "request precedes the first block at {}", first)
                    }
                    ReadError::Overruns {
                        block_fpos,
                        block_size,
                    } => write!(
                        f,
                        "request overruns the block at {} of length {}",
                        block_fpos, block_size
                    ),
                    ReadError::Gap {
                        block_fpos,
                        block_size,
                    } => write!(
                        f,
                        "request falls in the gap after the block at {} of length {}",
                        block_fpos, block_size
                    ),
                }
            }
            Error::Erase { file_position } => {
                write!(f, "erase(): no block starts at position {}", file_position)
            }
            Error::NotFound { id } => write!(f, "no sparse virtual file \"{}\"", id),
            Error::AlreadyExists { id } => {
                write!(f, "sparse virtual file \"{}\" already exists", id)
            }
            Error::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for RustSVF operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_display() {
        let err = Error::Diff {
            file_position: 10,
            existing: b'C',
            incoming: b'X',
        };
        assert_eq!(
            err.to_string(),
            "write(): difference at position 10: existing x'43' != incoming x'58'"
        );
    }

    #[test]
    fn test_read_display_includes_positions() {
        let err = Error::Read {
            kind: ReadError::Overruns {
                block_fpos: 8,
                block_size: 4,
            },
            file_position: 9,
            length: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("position 9"), "{}", msg);
        assert!(msg.contains("length 12"), "{}", msg);
        assert!(msg.contains("block at 8"), "{}", msg);
    }

    #[test]
    fn test_container_errors_name_the_id() {
        assert_eq!(
            Error::NotFound { id: "a".into() }.to_string(),
            "no sparse virtual file \"a\""
        );
        assert_eq!(
            Error::AlreadyExists { id: "a".into() }.to_string(),
            "sparse virtual file \"a\" already exists"
        );
    }
}
