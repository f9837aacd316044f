use std::str::FromStr;

use crate::command::Command;
use crate::error::{MessageParseError, ProtocolError};

use super::nom_parser::{ParsedMessage, MAX_PARAMS};
use super::types::Message;

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |cause| ProtocolError::InvalidMessage {
            string: s.to_string(),
            cause,
        };

        let line = s.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(invalid(MessageParseError::EmptyMessage));
        }

        let parsed = ParsedMessage::parse(line).map_err(|e| {
            if e.kind == nom::error::ErrorKind::TooLarge {
                invalid(MessageParseError::TooManyParams { limit: MAX_PARAMS })
            } else if line.starts_with(':') && !line.contains(' ') {
                invalid(MessageParseError::InvalidSource(line.to_string()))
            } else {
                invalid(MessageParseError::InvalidArgument(format!(
                    "parse failed at position {}: {:?}",
                    e.position, e.kind
                )))
            }
        })?;

        let command = Command::new(parsed.command, parsed.params.to_vec()).map_err(invalid)?;

        Ok(Message {
            source: parsed.source.map(str::to_string),
            command,
        })
    }
}
