//! Transactional filesystem operations.
//!
//! [`transaction`] (or [`TransactionManager::run`]) hands a callback a
//! [`TransactionHandle`]. Each mutating call made through the handle is
//! journaled together with a backup of everything it is about to change. If
//! the callback fails, panics, or runs past its timeout, the journal is
//! replayed in reverse and the filesystem is put back the way it was.
//!
//! ```no_run
//! use fsflow::prelude::*;
//! use std::path::PathBuf;
//!
//! # async fn demo() -> Result<(), FlowError> {
//! let (src, dst) = (PathBuf::from("a.txt"), PathBuf::from("b.txt"));
//! transaction(TransactionOptions::new(), move |tx| async move {
//!     tx.copy(&src, &dst, CopyOptions::default()).await?;
//!     tx.write_file(&dst, b"patched").await
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod handle;
mod manager;
mod record;
mod state;


pub use handle::TransactionHandle;
pub use manager::{transaction, TransactionManager, TransactionOptions};
pub use record::{OperationKind, OperationRecord, TargetRecord};
pub use state::TransactionState;
