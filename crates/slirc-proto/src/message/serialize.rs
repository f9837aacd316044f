use std::fmt::{self, Display, Formatter, Write};

use crate::error::MessageParseError;

use super::nom_parser::MAX_PARAMS;
use super::types::Message;

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, ":{} ", source)?;
        }
        write!(f, "{}", self.command)
    }
}

impl Message {
    /// Serialize without terminator, failing instead of panicking when a
    /// parameter would break framing or the line carries more parameters
    /// than a peer will parse.
    pub fn to_line(&self) -> Result<String, MessageParseError> {
        let mut line = String::new();
        write!(line, "{}", self.command).map_err(|_| {
            MessageParseError::InvalidArgument(format!(
                "{} carries a line break or NUL",
                self.command.name()
            ))
        })?;
        if param_count(&line) > MAX_PARAMS {
            return Err(MessageParseError::TooManyParams { limit: MAX_PARAMS });
        }
        if let Some(ref source) = self.source {
            line.insert_str(0, &format!(":{} ", source));
        }
        Ok(line)
    }
}

/// Parameters after the command name of a serialized command.
fn param_count(command: &str) -> usize {
    let mut count = 0;
    for word in command.split(' ').skip(1).filter(|w| !w.is_empty()) {
        count += 1;
        if word.starts_with(':') {
            break;
        }
    }
    count
}
