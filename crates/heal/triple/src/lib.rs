//! HEAL Triple - correlation of the three membership views
//!
//! A [`Triple`] is a per-cycle snapshot joining compute instances,
//! control-plane registry entries and cluster membership records on the
//! cloud instance id. Every identity seen in any view owns exactly one
//! [`NodeInfo`] row; the pointers that failed to correlate stay empty and
//! drive the diff queries.

mod error;
mod info;
mod triple;

pub use error::{TripleError, TripleResult};
pub use info::NodeInfo;
pub use triple::Triple;
