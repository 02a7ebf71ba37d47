//! Low-level primitives underneath the B-tree.
//!
//! Includes positioned file I/O and the page stores the tree reads from and
//! writes to.

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Page storage for copy-on-write trees.
///
/// In-memory and file-backed stores behind a common trait.
pub mod pager;
