//! Property-based tests for the line parser.

use proptest::prelude::*;
use slirc_proto::{Command, Message};

fn uid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9][A-Z0-9]{8}").expect("valid regex")
}

/// Text that cannot break framing.
fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^\r\n\0]{0,300}").expect("valid regex")
}

proptest! {
    #[test]
    fn parser_never_panics(line in "[^\r\n]{0,512}") {
        let _ = line.parse::<Message>();
    }

    #[test]
    fn trailing_text_survives(source in uid_strategy(), target in uid_strategy(), text in text_strategy()) {
        let msg = Message::from_source(source, Command::PRIVMSG(target, text.clone()));
        let parsed: Message = msg.to_string().parse().unwrap();
        match parsed.command {
            Command::PRIVMSG(_, parsed_text) => prop_assert_eq!(parsed_text, text),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}
