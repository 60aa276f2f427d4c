//! Test support for code built on fsflow.
//!
//! - [`FaultyFileSystem`] wraps a [`FileSystem`](crate::fs::FileSystem) and
//!   injects classified failures or delays for chosen paths
//! - [`ConcurrencyProbe`] measures how many tasks run at once

mod faulty_fs;
mod probe;

pub use faulty_fs::{FaultOp, FaultyFileSystem};
pub use probe::{ConcurrencyProbe, ProbeGuard};
