use std::fmt::{self, Write};

use super::types::Command;
use super::util::{write_cmd, write_cmd_freeform};

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CAPAB(version, caps) => {
                write_cmd_freeform(f, "CAPAB", &[&version.to_string(), &caps.join(" ")])
            }
            Command::SERVER {
                name,
                password,
                hopcount,
                sid,
                description,
            } => write_cmd_freeform(
                f,
                "SERVER",
                &[name, password, &hopcount.to_string(), sid, description],
            ),
            Command::BURST(Some(ts)) => write_cmd(f, "BURST", &[&ts.to_string()]),
            Command::BURST(None) => write_cmd(f, "BURST", &[]),
            Command::ENDBURST => write_cmd(f, "ENDBURST", &[]),
            Command::UID {
                uid,
                ts,
                nick,
                user,
                host,
                modes,
                realname,
            } => write_cmd_freeform(
                f,
                "UID",
                &[uid, &ts.to_string(), nick, user, host, modes, realname],
            ),
            Command::NICK(nick, ts) => write_cmd(f, "NICK", &[nick, &ts.to_string()]),
            Command::MODE(target, modes) => write_cmd(f, "MODE", &[target, modes]),
            Command::QUIT(Some(reason)) => write_cmd_freeform(f, "QUIT", &[reason]),
            Command::QUIT(None) => write_cmd(f, "QUIT", &[]),
            Command::KILL(target, reason) => write_cmd_freeform(f, "KILL", &[target, reason]),
            Command::SJOIN {
                ts,
                channel,
                modes,
                args,
                members,
            } => {
                write!(f, "SJOIN {} {} {}", ts, channel, modes)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                f.write_str(" :")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    f.write_str(&member.prefix)?;
                    f.write_str(&member.uid)?;
                }
                Ok(())
            }
            Command::TMODE {
                ts,
                channel,
                modes,
                args,
            } => {
                let ts = ts.to_string();
                let mut params: Vec<&str> = vec![&ts, channel, modes];
                params.extend(args.iter().map(String::as_str));
                write_cmd(f, "TMODE", &params)
            }
            Command::PART(channel, Some(reason)) => {
                write_cmd_freeform(f, "PART", &[channel, reason])
            }
            Command::PART(channel, None) => write_cmd(f, "PART", &[channel]),
            Command::ADDLINE {
                kind,
                mask,
                setter,
                set_at,
                duration,
                reason,
            } => write_cmd_freeform(
                f,
                "ADDLINE",
                &[
                    kind,
                    mask,
                    setter,
                    &set_at.to_string(),
                    &duration.to_string(),
                    reason,
                ],
            ),
            Command::DELLINE(kind, mask) => write_cmd(f, "DELLINE", &[kind, mask]),
            Command::SQUIT(sid, reason) => write_cmd_freeform(f, "SQUIT", &[sid, reason]),
            Command::PRIVMSG(target, text) => write_cmd_freeform(f, "PRIVMSG", &[target, text]),
            Command::NOTICE(target, text) => write_cmd_freeform(f, "NOTICE", &[target, text]),
            Command::ENCAP(target, sub, params) => {
                let mut all: Vec<&str> = vec![target, sub];
                all.extend(params.iter().map(String::as_str));
                write_cmd(f, "ENCAP", &all)
            }
            Command::PING(source, Some(target)) => write_cmd(f, "PING", &[source, target]),
            Command::PING(source, None) => write_cmd(f, "PING", &[source]),
            Command::PONG(source, Some(target)) => write_cmd(f, "PONG", &[source, target]),
            Command::PONG(source, None) => write_cmd(f, "PONG", &[source]),
            Command::ERROR(reason) => write_cmd_freeform(f, "ERROR", &[reason]),
            Command::Raw(name, params) => {
                let params: Vec<&str> = params.iter().map(String::as_str).collect();
                write_cmd(f, name, &params)
            }
        }
    }
}
