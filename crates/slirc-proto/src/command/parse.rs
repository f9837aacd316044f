use crate::error::MessageParseError;

use super::types::{Command, Member};

fn require(cmd: &str, args: &[&str], expected: usize) -> Result<(), MessageParseError> {
    if args.len() < expected {
        return Err(MessageParseError::NotEnoughArguments {
            command: cmd.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn number<T: std::str::FromStr>(value: &str) -> Result<T, MessageParseError> {
    value
        .parse()
        .map_err(|_| MessageParseError::InvalidArgument(value.to_string()))
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

impl Command {
    /// Build a command from its name and parameters.
    ///
    /// The name is matched case-insensitively. Unknown names produce
    /// [`Command::Raw`]; known names with missing or malformed parameters
    /// produce an error.
    pub fn new(cmd: &str, args: Vec<&str>) -> Result<Command, MessageParseError> {
        let upper = cmd.to_ascii_uppercase();
        let a = args.as_slice();

        let command = match upper.as_str() {
            "CAPAB" => {
                require(&upper, a, 2)?;
                let caps = a[1].split_whitespace().map(str::to_string).collect();
                Command::CAPAB(number(a[0])?, caps)
            }
            "SERVER" => {
                require(&upper, a, 5)?;
                Command::SERVER {
                    name: a[0].to_string(),
                    password: a[1].to_string(),
                    hopcount: number(a[2])?,
                    sid: a[3].to_string(),
                    description: a[4].to_string(),
                }
            }
            "BURST" => Command::BURST(a.first().map(|ts| number(ts)).transpose()?),
            "ENDBURST" => Command::ENDBURST,
            "UID" => {
                require(&upper, a, 7)?;
                Command::UID {
                    uid: a[0].to_string(),
                    ts: number(a[1])?,
                    nick: a[2].to_string(),
                    user: a[3].to_string(),
                    host: a[4].to_string(),
                    modes: a[5].to_string(),
                    realname: a[6].to_string(),
                }
            }
            "NICK" => {
                require(&upper, a, 2)?;
                Command::NICK(a[0].to_string(), number(a[1])?)
            }
            "MODE" => {
                require(&upper, a, 2)?;
                Command::MODE(a[0].to_string(), a[1..].join(" "))
            }
            "QUIT" => Command::QUIT(a.first().map(|r| (*r).to_string())),
            "KILL" => {
                require(&upper, a, 1)?;
                Command::KILL(a[0].to_string(), a.get(1).copied().unwrap_or("").to_string())
            }
            "SJOIN" => {
                require(&upper, a, 4)?;
                let (last, rest) = (a[a.len() - 1], &a[..a.len() - 1]);
                Command::SJOIN {
                    ts: number(rest[0])?,
                    channel: rest[1].to_string(),
                    modes: rest[2].to_string(),
                    args: owned(&rest[3..]),
                    members: last.split_whitespace().map(Member::from_token).collect(),
                }
            }
            "TMODE" => {
                require(&upper, a, 3)?;
                Command::TMODE {
                    ts: number(a[0])?,
                    channel: a[1].to_string(),
                    modes: a[2].to_string(),
                    args: owned(&a[3..]),
                }
            }
            "PART" => {
                require(&upper, a, 1)?;
                Command::PART(a[0].to_string(), a.get(1).map(|r| (*r).to_string()))
            }
            "ADDLINE" => {
                require(&upper, a, 6)?;
                Command::ADDLINE {
                    kind: a[0].to_string(),
                    mask: a[1].to_string(),
                    setter: a[2].to_string(),
                    set_at: number(a[3])?,
                    duration: number(a[4])?,
                    reason: a[5].to_string(),
                }
            }
            "DELLINE" => {
                require(&upper, a, 2)?;
                Command::DELLINE(a[0].to_string(), a[1].to_string())
            }
            "SQUIT" => {
                require(&upper, a, 1)?;
                Command::SQUIT(a[0].to_string(), a.get(1).copied().unwrap_or("").to_string())
            }
            "PRIVMSG" => {
                require(&upper, a, 2)?;
                Command::PRIVMSG(a[0].to_string(), a[1].to_string())
            }
            "NOTICE" => {
                require(&upper, a, 2)?;
                Command::NOTICE(a[0].to_string(), a[1].to_string())
            }
            "ENCAP" => {
                require(&upper, a, 2)?;
                Command::ENCAP(a[0].to_string(), a[1].to_ascii_uppercase(), owned(&a[2..]))
            }
            "PING" => {
                require(&upper, a, 1)?;
                Command::PING(a[0].to_string(), a.get(1).map(|t| (*t).to_string()))
            }
            "PONG" => {
                require(&upper, a, 1)?;
                Command::PONG(a[0].to_string(), a.get(1).map(|t| (*t).to_string()))
            }
            "ERROR" => Command::ERROR(a.first().copied().unwrap_or("").to_string()),
            _ => Command::Raw(upper, owned(a)),
        };

        Ok(command)
    }
}
