//! Wire messages: an optional source followed by a command.

mod nom_parser;
mod parse;
mod serialize;
mod types;

pub use self::nom_parser::MAX_PARAMS;
pub use self::types::Message;
