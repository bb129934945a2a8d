//! Line parser for the CSA/x1 command protocol.
//!
//! Patterns are tried in a fixed order and the first match wins, so a line
//! such as `+OK` parses as a move and `%%GAMEX` is an unknown command.

use std::sync::LazyLock;

use regex::Regex;

use crate::player::Side;

static GAME_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%%(GAME|CHALLENGE)\s+(\S+)\s+([+\-*])\s*$").expect("game request pattern")
});
static GAME_CANCEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^%%GAME\s*$").expect("game cancel pattern"));
static GAME_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%%(SHOW|MONITORON|MONITOROFF)\s+(\S+)").expect("game argument pattern")
});
static CHAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^%%CHAT\s+(.+)").expect("chat pattern"));

/// Persistent `%%GAME` request or one-shot `%%CHALLENGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Game,
    Challenge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty line; answered with a bare newline.
    KeepAlive,
    /// `+7776FU` or `+7776FU,'comment`.
    Move { mv: String, comment: Option<String> },
    /// `%TORYO` and other single-`%` game commands.
    Special(String),
    Reject,
    Agree,
    Show(String),
    MonitorOn(String),
    MonitorOff(String),
    Help,
    Rating,
    Version,
    /// Bare `%%GAME`: withdraws a waiting request.
    CancelGame,
    RequestGame {
        kind: RequestKind,
        game_name: String,
        side: Option<Side>,
    },
    Chat(String),
    List,
    Who,
    Logout,
    /// Legacy `CHALLENGE` without arguments.
    Challenge,
    /// Whitespace only.
    Blank,
    Unknown(String),
}

impl Command {
    /// Parses one line with its line terminator already removed.
    pub fn parse(line: &str) -> Command {
        if line.is_empty() {
            return Command::KeepAlive;
        }
        let mut chars = line.chars();
        let first = chars.next();
        let second = chars.next();
        if matches!(first, Some('+' | '-')) && second.is_some_and(|c| c != '%') {
            return parse_move(line);
        }
        if first == Some('%') && second.is_some_and(|c| c != '%') {
            return Command::Special(line.to_string());
        }
        if line.starts_with("REJECT") {
            return Command::Reject;
        }
        if line.starts_with("AGREE") {
            return Command::Agree;
        }
        if let Some(caps) = GAME_ARG.captures(line) {
            let id = caps[2].to_string();
            return match &caps[1] {
                "SHOW" => Command::Show(id),
                "MONITORON" => Command::MonitorOn(id),
                _ => Command::MonitorOff(id),
            };
        }
        if line.starts_with("%%HELP") {
            return Command::Help;
        }
        if line.starts_with("%%RATING") {
            return Command::Rating;
        }
        if line.starts_with("%%VERSION") {
            return Command::Version;
        }
        if GAME_CANCEL.is_match(line) {
            return Command::CancelGame;
        }
        if let Some(caps) = GAME_REQUEST.captures(line) {
            let kind = if &caps[1] == "GAME" {
                RequestKind::Game
            } else {
                RequestKind::Challenge
            };
            // The pattern only admits the three markers.
            let side = Side::parse_preference(&caps[3]).flatten();
            return Command::RequestGame {
                kind,
                game_name: caps[2].to_string(),
                side,
            };
        }
        if let Some(caps) = CHAT.captures(line) {
            return Command::Chat(caps[1].to_string());
        }
        if line.starts_with("%%LIST") {
            return Command::List;
        }
        if line.starts_with("%%WHO") {
            return Command::Who;
        }
        if line.starts_with("LOGOUT") {
            return Command::Logout;
        }
        if line.starts_with("CHALLENGE") {
            return Command::Challenge;
        }
        if line.trim().is_empty() {
            return Command::Blank;
        }
        Command::Unknown(line.to_string())
    }
}

fn parse_move(line: &str) -> Command {
    let (mv, rest) = match line.split_once(',') {
        Some((mv, rest)) => (mv, Some(rest)),
        None => (line, None),
    };
    let comment = rest
        .and_then(|rest| rest.strip_prefix('\''))
        .map(|text| format!("'*{text}"));
    Command::Move {
        mv: mv.to_string(),
        comment,
    }
}

/// Game names: 1 to 32 characters of `[A-Za-z0-9_-]`.
pub fn is_good_game_name(name: &str) -> bool {
    (1..=32).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Pool names that pair automatically and never take a side preference.
pub fn is_floodgate_name(name: &str) -> bool {
    static FLOODGATE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^floodgate-\d+-\d+$").expect("floodgate pattern"));
    FLOODGATE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_and_comments() {
        assert_eq!(
            Command::parse("+7776FU"),
            Command::Move {
                mv: "+7776FU".into(),
                comment: None
            }
        );
        assert_eq!(
            Command::parse("-3334FU,'* 30 +2726FU"),
            Command::Move {
                mv: "-3334FU".into(),
                comment: Some("'** 30 +2726FU".into())
            }
        );
        assert_eq!(
            Command::parse("+7776FU,T3"),
            Command::Move {
                mv: "+7776FU".into(),
                comment: None
            }
        );
        assert_eq!(
            Command::parse("+2726FU,'good, solid"),
            Command::Move {
                mv: "+2726FU".into(),
                comment: Some("'*good, solid".into())
            }
        );
    }

    #[test]
    fn percent_forms() {
        assert_eq!(Command::parse("%TORYO"), Command::Special("%TORYO".into()));
        assert_eq!(Command::parse("%%WHO"), Command::Who);
        assert_eq!(Command::parse("%%LIST"), Command::List);
        assert_eq!(Command::parse("%%HELP"), Command::Help);
        assert_eq!(Command::parse("%%RATING"), Command::Rating);
        assert_eq!(Command::parse("%%VERSION"), Command::Version);
        assert_eq!(Command::parse("%%CHAT hello all"), Command::Chat("hello all".into()));
        assert_eq!(Command::parse("%%SHOW g1"), Command::Show("g1".into()));
        assert_eq!(Command::parse("%%MONITORON g1"), Command::MonitorOn("g1".into()));
        assert_eq!(Command::parse("%%MONITOROFF g1"), Command::MonitorOff("g1".into()));
    }

    #[test]
    fn game_requests() {
        assert_eq!(Command::parse("%%GAME"), Command::CancelGame);
        assert_eq!(Command::parse("%%GAME  "), Command::CancelGame);
        assert_eq!(
            Command::parse("%%GAME blitz +"),
            Command::RequestGame {
                kind: RequestKind::Game,
                game_name: "blitz".into(),
                side: Some(Side::Sente)
            }
        );
        assert_eq!(
            Command::parse("%%CHALLENGE blitz *"),
            Command::RequestGame {
                kind: RequestKind::Challenge,
                game_name: "blitz".into(),
                side: None
            }
        );
        assert_eq!(
            Command::parse("%%GAME blitz x"),
            Command::Unknown("%%GAME blitz x".into())
        );
    }

    #[test]
    fn plain_words_match_by_prefix() {
        assert_eq!(Command::parse("AGREE"), Command::Agree);
        assert_eq!(Command::parse("AGREE blitz+a+b+1"), Command::Agree);
        assert_eq!(Command::parse("REJECT"), Command::Reject);
        assert_eq!(Command::parse("LOGOUT"), Command::Logout);
        assert_eq!(Command::parse("CHALLENGE"), Command::Challenge);
    }

    #[test]
    fn blank_empty_and_unknown() {
        assert_eq!(Command::parse(""), Command::KeepAlive);
        assert_eq!(Command::parse("   "), Command::Blank);
        assert_eq!(Command::parse("HELLO"), Command::Unknown("HELLO".into()));
        assert_eq!(Command::parse("%%SHOW"), Command::Unknown("%%SHOW".into()));
        assert_eq!(Command::parse("+"), Command::Unknown("+".into()));
    }

    #[test]
    fn game_name_rules() {
        assert!(is_good_game_name("blitz-30_5"));
        assert!(!is_good_game_name(""));
        assert!(!is_good_game_name("bad name"));
        assert!(!is_good_game_name(&"a".repeat(33)));
        assert!(is_floodgate_name("floodgate-900-0"));
        assert!(!is_floodgate_name("floodgate-900"));
        assert!(!is_floodgate_name("myfloodgate-900-0"));
    }
}
