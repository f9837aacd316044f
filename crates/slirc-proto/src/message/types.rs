use crate::command::Command;
use crate::sid::{ServerId, SID_LEN};

/// A single line on a server link.
///
/// The source is the SID of the originating server or the UID of the
/// originating user. Lines sent by the adjacent server about itself may
/// omit it.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Originating SID or UID, without the leading `:`.
    pub source: Option<String>,
    /// The command.
    pub command: Command,
}

impl Message {
    /// A message with no source.
    pub fn new(command: Command) -> Self {
        Self {
            source: None,
            command,
        }
    }

    /// A message originating from `source`.
    pub fn from_source(source: impl Into<String>, command: Command) -> Self {
        Self {
            source: Some(source.into()),
            command,
        }
    }

    /// Replace the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The server the source belongs to: the SID itself, or the SID
    /// embedded in a UID.
    pub fn source_server(&self) -> Option<ServerId> {
        let source = self.source.as_deref()?;
        if source.len() < SID_LEN || !source.is_char_boundary(SID_LEN) {
            return None;
        }
        let sid = ServerId::new(&source[..SID_LEN]);
        sid.is_valid().then_some(sid)
    }
}
