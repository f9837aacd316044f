use slirc_proto::{
    Command, Member, Message, MessageParseError, ProtocolError, ServerId, MANDATORY_CAPABS,
    MAX_PARAMS, PROTOCOL_VERSION,
};

#[test]
fn test_handshake_lines() {
    let capab = Message::new(Command::CAPAB(
        PROTOCOL_VERSION,
        MANDATORY_CAPABS.iter().map(|c| c.to_string()).collect(),
    ));
    assert_eq!(capab.to_string(), "CAPAB 1200 :BURST ENDBURST SJOIN ADDLINE");

    let server = Message::new(Command::SERVER {
        name: "leaf.example.net".into(),
        password: "secret".into(),
        hopcount: 0,
        sid: "00B".into(),
        description: "Leaf server".into(),
    });
    assert_eq!(
        server.to_string(),
        "SERVER leaf.example.net secret 0 00B :Leaf server"
    );
}

#[test]
fn test_remote_server_introduction() {
    let msg: Message = ":00B SERVER far.example.net * 2 00C :Far away".parse().unwrap();
    assert_eq!(msg.source_server(), Some(ServerId::new("00B")));
    match msg.command {
        Command::SERVER {
            name,
            password,
            hopcount,
            sid,
            ..
        } => {
            assert_eq!(name, "far.example.net");
            assert_eq!(password, "*");
            assert_eq!(hopcount, 2);
            assert_eq!(sid, "00C");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_burst_user_line() {
    let msg = Message::from_source(
        "00A",
        Command::UID {
            uid: "00AAAAAAB".into(),
            ts: 100,
            nick: "alice".into(),
            user: "alice".into(),
            host: "example.org".into(),
            modes: "+i".into(),
            realname: "Alice Liddell".into(),
        },
    );
    let line = msg.to_string();
    assert_eq!(
        line,
        ":00A UID 00AAAAAAB 100 alice alice example.org +i :Alice Liddell"
    );
    assert_eq!(line.parse::<Message>().unwrap(), msg);
}

#[test]
fn test_sjoin_with_key() {
    let msg: Message = ":00A SJOIN 1234567890 #test +nt key :@001AAAAAA 001AAAAAB +001AAAAAC"
        .parse()
        .unwrap();
    match msg.command {
        Command::SJOIN {
            ts,
            channel,
            args,
            members,
            ..
        } => {
            assert_eq!(ts, 1234567890);
            assert_eq!(channel, "#test");
            assert_eq!(args, vec!["key".to_string()]);
            assert_eq!(
                members,
                vec![
                    Member::new("@", "001AAAAAA"),
                    Member::new("", "001AAAAAB"),
                    Member::new("+", "001AAAAAC"),
                ]
            );
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_addline_fields() {
    let msg: Message = ":00A ADDLINE G *@bad.host oper 1700000000 3600 :Spamming"
        .parse()
        .unwrap();
    assert_eq!(
        msg.command,
        Command::ADDLINE {
            kind: "G".into(),
            mask: "*@bad.host".into(),
            setter: "oper".into(),
            set_at: 1_700_000_000,
            duration: 3600,
            reason: "Spamming".into(),
        }
    );
}

#[test]
fn test_encap_keeps_params() {
    let msg: Message = ":00AAAAAAB ENCAP * CHGHOST 00AAAAAAB :new.host".parse().unwrap();
    assert_eq!(
        msg.command,
        Command::ENCAP(
            "*".into(),
            "CHGHOST".into(),
            vec!["00AAAAAAB".into(), "new.host".into()]
        )
    );
}

#[test]
fn test_squit_without_reason() {
    let msg: Message = "SQUIT 00C".parse().unwrap();
    assert_eq!(msg.command, Command::SQUIT("00C".into(), String::new()));
}

#[test]
fn test_tmode_at_the_parameter_limit_round_trips() {
    let args: Vec<String> = (0..12).map(|i| format!("*!*@ban{i}.example")).collect();
    let msg = Message::from_source(
        "00A",
        Command::TMODE {
            ts: 100,
            channel: "#big".into(),
            modes: format!("+{}", "b".repeat(12)),
            args: args.clone(),
        },
    );
    let line = msg.to_line().unwrap();
    let parsed: Message = line.parse().unwrap();
    match parsed.command {
        Command::TMODE { args: parsed_args, .. } => assert_eq!(parsed_args, args),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_over_long_parameter_lists_are_refused_both_ways() {
    let args: Vec<String> = (0..14).map(|i| format!("*!*@ban{i}.example")).collect();
    let msg = Message::from_source(
        "00A",
        Command::TMODE {
            ts: 100,
            channel: "#big".into(),
            modes: format!("+{}", "b".repeat(14)),
            args: args.clone(),
        },
    );
    assert_eq!(
        msg.to_line(),
        Err(MessageParseError::TooManyParams { limit: MAX_PARAMS })
    );

    let line = format!(":00A TMODE 100 #big +{} {}", "b".repeat(14), args.join(" "));
    let err = line.parse::<Message>().unwrap_err();
    assert!(
        matches!(
            err,
            ProtocolError::InvalidMessage {
                cause: MessageParseError::TooManyParams { .. },
                ..
            }
        ),
        "{err:?}"
    );
}
