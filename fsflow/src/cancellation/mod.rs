//! Cooperative close signalling.
//!
//! A [`CancellationToken`] marks a transaction handle as finished so late
//! calls are rejected with the reason the transaction ended.

mod token;

pub use token::CancellationToken;
