//! Typed command groups of `CacheClient`, one module per store data type.

mod hash;
mod list;
mod set;
mod zset;

pub use list::ListPosition;
pub use zset::{ScoreBound, ScoredMember};
