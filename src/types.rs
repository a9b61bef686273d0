//! Core type aliases and configuration for RustSVF
//!
//! This module defines the foundational numeric aliases and the per-file
//! configuration flags used throughout the crate.

use bitflags::bitflags;

// ============================================================================
// Numeric Type Aliases
// ============================================================================

/// Absolute file position (byte offset in the underlying file)
pub type FilePos = u64;

/// Monotonically increasing per-block touch counter
pub type BlockTouch = u64;

/// A single seek/read instruction: (file position, length)
pub type SeekRead = (FilePos, usize);

// ============================================================================
// Configuration Flags
// ============================================================================

bitflags! {
    /// Behaviour flags for a sparse virtual file
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SvfFlags: u8 {
        /// Compare incoming bytes with resident data on overlapping writes
        /// and reject the write on any difference
        const COMPARE_FOR_DIFF = 0x01;
        /// Overwrite all block payloads with zeros before they are released
        const OVERWRITE_ON_EXIT = 0x02;
    }
}

/// Configuration of a sparse virtual file.
///
/// The default enables overlap verification and leaves payload scrubbing
/// off, trading a per-byte comparison on overlapping writes for the
/// guarantee that divergent data is never silently merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvfConfig {
    flags: SvfFlags,
}

impl SvfConfig {
    pub fn new() -> Self {
        Self {
            flags: SvfFlags::COMPARE_FOR_DIFF,
        }
    }

    /// Verify overlapping bytes on write?
    pub fn compare_for_diff(&self) -> bool {
        self.flags.contains(SvfFlags::COMPARE_FOR_DIFF)
    }

    /// Scrub payloads before release?
    pub fn overwrite_on_exit(&self) -> bool {
        self.flags.contains(SvfFlags::OVERWRITE_ON_EXIT)
    }

    pub fn set_compare_for_diff(mut self, on: bool) -> Self {
        self.flags.set(SvfFlags::COMPARE_FOR_DIFF, on);
        self
    }

    pub fn set_overwrite_on_exit(mut self, on: bool) -> Self {
        self.flags.set(SvfFlags::OVERWRITE_ON_EXIT, on);
        self
    }

    pub fn flags(&self) -> SvfFlags {
        self.flags
    }
}

impl Default for SvfConfig {
    fn default() -> Self {
        Self::new()
    }
}
