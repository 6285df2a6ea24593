//! The scripted command surface (`spec.md` §6). Key inputs to
//! `Lookup`/`Insert`/`Retrieve` are the SHA-1 of the given string.

use corelib::Identifier;
use sha1::{Digest, Sha1};

#[derive(Debug, Clone)]
pub enum Command {
    InsertVNode { name: String },
    Lookup { key: String },
    Insert { name: String, value: String },
    Retrieve { name: String },
    RemoveVNode { name: String },
    TraceRing { name: String },
    DumpVNodeInfo { name: String },
    DumpDHashInfo,
    FixFinger { name: String },
    Detach,
    ReAttach,
    Crash,
    Restart,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} expects {1} argument(s)")]
    WrongArity(String, usize),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(ParseError::Empty)?;
        let rest: Vec<&str> = parts.collect();
        match verb {
            "InsertVNode" => Ok(Command::InsertVNode { name: one(verb, &rest)? }),
            "Lookup" => Ok(Command::Lookup { key: one(verb, &rest)? }),
            "Insert" => match rest.as_slice() {
                [name, value] => Ok(Command::Insert { name: name.to_string(), value: value.to_string() }),
                _ => Err(ParseError::WrongArity("Insert".into(), 2)),
            },
            "Retrieve" => Ok(Command::Retrieve { name: one(verb, &rest)? }),
            "RemoveVNode" => Ok(Command::RemoveVNode { name: one(verb, &rest)? }),
            "TraceRing" => Ok(Command::TraceRing { name: one(verb, &rest)? }),
            "DumpVNodeInfo" => Ok(Command::DumpVNodeInfo { name: one(verb, &rest)? }),
            "DumpDHashInfo" => Ok(Command::DumpDHashInfo),
            "FixFinger" => Ok(Command::FixFinger { name: one(verb, &rest)? }),
            "Detach" => Ok(Command::Detach),
            "ReAttach" => Ok(Command::ReAttach),
            "Crash" => Ok(Command::Crash),
            "Restart" => Ok(Command::Restart),
            "quit" => Ok(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn one(verb: &str, rest: &[&str]) -> Result<String, ParseError> {
    match rest {
        [only] => Ok(only.to_string()),
        _ => Err(ParseError::WrongArity(verb.to_string(), 1)),
    }
}

/// SHA-1 of `s`, as the little-endian `Identifier` the ring keys on.
pub fn hash_key(s: &str) -> Identifier {
    let digest = Sha1::digest(s.as_bytes());
    Identifier::from_be_hash(digest.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_argument_insert() {
        match Command::parse("Insert html 2.2.2.2").unwrap() {
            Command::Insert { name, value } => {
                assert_eq!(name, "html");
                assert_eq!(value, "2.2.2.2");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(matches!(Command::parse("Lookup").unwrap_err(), ParseError::WrongArity(_, 1)));
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(matches!(Command::parse("Frobnicate x").unwrap_err(), ParseError::Unknown(_)));
    }

    #[test]
    fn hash_key_is_deterministic() {
        assert_eq!(hash_key("A").as_le_bytes(), hash_key("A").as_le_bytes());
        assert_ne!(hash_key("A").as_le_bytes(), hash_key("B").as_le_bytes());
    }
}
