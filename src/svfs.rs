//! Keyed container of sparse virtual files
//!
//! A [`SparseVirtualFileSystem`] owns one [`SparseVirtualFile`] per string
//! identifier and applies a single shared configuration to every file it
//! creates. It adds no semantics beyond keying: per-file operations are
//! delegated to the named file, and the aggregate accessors simply sum
//! across the contained files.

use std::collections::HashMap;
use std::mem;

use log::debug;

use crate::error::{Error, Result};
use crate::storage::svf::SparseVirtualFile;
use crate::types::{FilePos, SeekRead, SvfConfig};

#[derive(Debug, Default)]
pub struct SparseVirtualFileSystem {
    svfs: HashMap<String, SparseVirtualFile>,
    config: SvfConfig,
}

impl SparseVirtualFileSystem {
    /// An empty container with the default per-file configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty container whose configuration is applied to every file
    /// created through [`SparseVirtualFileSystem::insert`].
    pub fn with_config(config: SvfConfig) -> Self {
        Self {
            svfs: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> SvfConfig {
        self.config
    }

    // ========================================================================
    // Container operations
    // ========================================================================

    /// Create a new empty sparse virtual file under `id`.
    pub fn insert(&mut self, id: &str, mod_time: f64) -> Result<()> {
        if self.svfs.contains_key(id) {
            return Err(Error::AlreadyExists { id: id.to_string() });
        }
        self.svfs.insert(
            id.to_string(),
            SparseVirtualFile::with_config(id, mod_time, self.config),
        );
        debug!("svfs: inserted \"{}\"", id);
        Ok(())
    }

    /// Destroy the sparse virtual file under `id`. Scrub-on-exit
    /// configuration is honoured by the file's destructor.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        match self.svfs.remove(id) {
            Some(_) => {
                debug!("svfs: removed \"{}\"", id);
                Ok(())
            }
            None => Err(Error::NotFound { id: id.to_string() }),
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.svfs.contains_key(id)
    }

    pub fn at(&self, id: &str) -> Result<&SparseVirtualFile> {
        self.svfs
            .get(id)
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    pub fn at_mut(&mut self, id: &str) -> Result<&mut SparseVirtualFile> {
        self.svfs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Identifiers of all contained files, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.svfs.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.svfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.svfs.is_empty()
    }

    // ========================================================================
    // Aggregate statistics
    // ========================================================================

    /// Best-effort memory estimate across the container and all files
    pub fn total_size_of(&self) -> usize {
        mem::size_of::<Self>()
            + self
                .svfs
                .iter()
                .map(|(id, svf)| id.capacity() + svf.size_of())
                .sum::<usize>()
    }

    /// Exact number of resident data bytes across all files
    pub fn total_bytes(&self) -> usize {
        self.svfs.values().map(SparseVirtualFile::num_bytes).sum()
    }

    /// Exact number of resident blocks across all files
    pub fn total_blocks(&self) -> usize {
        self.svfs.values().map(SparseVirtualFile::num_blocks).sum()
    }

    /// Apply [`SparseVirtualFile::lru_punt`] with the same budget to every
    /// contained file and return the total number of bytes removed.
    pub fn lru_punt_all(&mut self, byte_budget: usize) -> usize {
        self.svfs
            .values_mut()
            .map(|svf| svf.lru_punt(byte_budget))
            .sum()
    }

    // ========================================================================
    // Delegated per-file operations
    // ========================================================================

    /// Does the named file hold `[fpos, fpos + len)` in one block?
    pub fn has_data(&self, id: &str, fpos: FilePos, len: usize) -> Result<bool> {
        Ok(self.at(id)?.has(fpos, len))
    }

    pub fn write(&mut self, id: &str, fpos: FilePos, data: &[u8]) -> Result<()> {
        self.at_mut(id)?.write(fpos, data)
    }

    pub fn read(&mut self, id: &str, fpos: FilePos, len: usize) -> Result<Vec<u8>> {
        self.at_mut(id)?.read(fpos, len)
    }

    pub fn need(&self, id: &str, fpos: FilePos, len: usize) -> Result<Vec<SeekRead>> {
        Ok(self.at(id)?.need(fpos, len))
    }

    pub fn need_greedy(
        &self,
        id: &str,
        fpos: FilePos,
        len: usize,
        greedy_len: usize,
    ) -> Result<Vec<SeekRead>> {
        Ok(self.at(id)?.need_greedy(fpos, len, greedy_len))
    }

    pub fn erase(&mut self, id: &str, fpos: FilePos) -> Result<usize> {
        self.at_mut(id)?.erase(fpos)
    }
}
