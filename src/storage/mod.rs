//! Storage layer: the ordered block index and the sparse virtual file

pub mod block_map;
pub mod svf;
