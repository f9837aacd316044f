//! Typed server-to-server commands.

mod parse;
mod serialize;
mod types;
pub(crate) mod util;

pub use types::{Command, Member};
