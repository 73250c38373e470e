//! Client command construction.

mod tag;
mod types;

pub use tag::TagSequence;
pub use types::{Command, FetchItems, StoreAction};
