//! Chunked binary log serializer for refract capture files.
//!
//! A capture log is a fixed header (magic, serialise version, application
//! metadata, optional thumbnail) followed by a flat stream of chunks. Each
//! chunk is `(u32 kind-word, u32 length, payload, optional callstack block)`;
//! the top bit of the kind word marks the callstack block. Chunks may nest:
//! a nested chunk is framed inline inside its parent's payload.
//!
//! [`ChunkWriter`] accumulates chunks in memory during capture and flushes a
//! complete log to disk; [`ChunkReader`] gives bounds-validated random access
//! over a loaded log. Ordering of bytes inside a chunk is the serializer's
//! concern; ordering between chunks is the caller's.

mod chunk;
mod format;
mod reader;
mod writer;

pub use chunk::Chunk;
pub use format::{AppInitParams, LogHeader, Thumbnail};
pub use reader::ChunkReader;
pub use writer::ChunkWriter;

use std::io;

/// Errors from reading or writing a capture log.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("not a refract capture log (bad magic)")]
    InvalidMagic,

    /// The log was written with a different serialise version. There is no
    /// cross-version portability; the open fails before any state is built.
    #[error("incompatible serialise version: expected {expected}, got {got}")]
    IncompatibleVersion { expected: u32, got: u32 },

    #[error("corrupt log: {0}")]
    Corrupt(&'static str),

    /// A chunk context was closed with a different kind than it was opened
    /// with, or a read ran past the current chunk's payload.
    #[error("chunk context mismatch: expected kind {expected}, got {got}")]
    ContextMismatch { expected: u32, got: u32 },
}

pub type TraceResult<T> = Result<T, TraceError>;
