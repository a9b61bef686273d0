//! RustSVF - a Sparse Virtual File system cache engine written in Rust
//!
//! A sparse virtual file ([`SparseVirtualFile`]) is an in-memory cache that
//! mirrors selected byte ranges of a remote or otherwise expensive-to-access
//! file at their original absolute positions. The cache never fetches
//! anything itself: callers ask [`SparseVirtualFile::need`] which ranges are
//! missing for a pending read, fetch those ranges by whatever means, and
//! deposit the results through [`SparseVirtualFile::write`]. Writes merge
//! with overlapping and abutting resident data, optionally verifying that
//! overlapping bytes are identical. A [`SparseVirtualFileSystem`] is a keyed
//! collection of independent files sharing one configuration.
//!
//! ```
//! use rustsvf::SparseVirtualFile;
//!
//! let mut svf = SparseVirtualFile::new("remote.bin", 0.0);
//! assert!(!svf.has(8, 4));
//! for (fpos, len) in svf.need(8, 4) {
//!     // Fetch [fpos, fpos + len) from the remote file here.
//!     svf.write(fpos, &vec![0xAB; len]).unwrap();
//! }
//! assert_eq!(svf.read(8, 4).unwrap(), vec![0xAB; 4]);
//! ```

pub mod error;
pub mod storage;
pub mod svfs;
pub mod sync;
pub mod types;

// Re-export the public surface.
pub use error::{Error, ReadError, Result};
pub use storage::block_map::{Block, BlockMap};
pub use storage::svf::{SparseVirtualFile, SvfState, STATE_VERSION};
pub use svfs::SparseVirtualFileSystem;
pub use sync::{RecursiveMutex, RecursiveMutexGuard};
pub use types::{BlockTouch, FilePos, SeekRead, SvfConfig, SvfFlags};

/// Crate version as reported to embedders
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
