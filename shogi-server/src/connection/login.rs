//! LOGIN handshake: `LOGIN <name> <password> [x1]`.
//!
//! A password of the form `<pass>,<secret>` makes the player rated; the
//! secret is what the identity token is derived from.

use tokio::sync::watch;

use crate::league::League;
use crate::player::{Player, PlayerIdentity, Protocol, SessionId};
use crate::write_guard::WriteGuard;

pub const LOGIN_INCORRECT: &str = "LOGIN:incorrect\n";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("no LOGIN within the login timeout")]
    Timeout,
    #[error("connection closed before LOGIN")]
    Closed,
    #[error("malformed LOGIN line: {0}")]
    Malformed(String),
    #[error("{0} is already logged in")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub name: String,
    pub secret: Option<String>,
    pub protocol: Protocol,
}

impl LoginRequest {
    pub fn parse(line: &str) -> Result<Self, LoginError> {
        let malformed = || LoginError::Malformed(line.to_string());
        let mut words = line.split_whitespace();
        if words.next() != Some("LOGIN") {
            return Err(malformed());
        }
        let (Some(name), Some(password)) = (words.next(), words.next()) else {
            return Err(malformed());
        };
        let protocol = match words.next() {
            None => Protocol::Csa,
            Some("x1") => Protocol::X1,
            Some(_) => return Err(malformed()),
        };
        if words.next().is_some() || !is_good_login_name(name) {
            return Err(malformed());
        }
        let secret = password
            .split_once(',')
            .map(|(_, secret)| secret.to_string())
            .filter(|secret| !secret.trim().is_empty());
        Ok(Self {
            name: name.to_string(),
            secret,
            protocol,
        })
    }

    fn identity(&self, league: &League) -> PlayerIdentity {
        let mut identity = PlayerIdentity::new(self.name.clone());
        if let Some(secret) = &self.secret {
            identity.set_secret(secret);
        }
        let stored = identity
            .identity_token()
            .and_then(|token| league.rating_record(token))
            .cloned();
        if let Some(record) = stored {
            identity.apply_record(&record);
        }
        identity
    }
}

/// Player names: 1 to 32 characters of `[A-Za-z0-9_@.-]`.
pub fn is_good_login_name(name: &str) -> bool {
    (1..=32).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'@' | b'.' | b'-'))
}

/// Adds the player to the league and acknowledges the login.
pub fn register(
    league: &mut League,
    request: &LoginRequest,
    out: &WriteGuard,
    cancel: watch::Sender<bool>,
) -> Result<SessionId, LoginError> {
    if league.players.contains_name(&request.name) {
        return Err(LoginError::Duplicate(request.name.clone()));
    }
    let session = league.next_session_id();
    let identity = request.identity(league);
    let player = Player::new(session, identity, request.protocol, out.clone(), cancel);
    league
        .add(player)
        .map_err(|p| LoginError::Duplicate(p.name().to_string()))?;

    out.write_safe(&format!("LOGIN:{} OK\n", request.name));
    if request.protocol == Protocol::X1 {
        out.write_safe("##[LOGIN] +OK x1\n");
    }
    tracing::info!(%session, player = %request.name, protocol = %request.protocol, "user logged in");
    Ok(session)
}
