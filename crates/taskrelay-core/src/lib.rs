//! Low-level helpers shared across taskrelay crates.
//!
//! Provides the atomic file-write primitive used by the mapping management
//! tool and small text utilities for error reporting.

pub mod atomic_io;
pub mod text_utils;

pub use atomic_io::write_text_atomic;
pub use text_utils::truncate_for_error;
