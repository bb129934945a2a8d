//! Player identity, rating metadata and per-connection player state.
//!
//! A [`PlayerIdentity`] is created from the LOGIN credentials and carries
//! everything the rating listing needs. A [`Player`] wraps the identity with
//! the connection-level state other connections must see while matchmaking
//! (status, desired side, current game) and the connection's [`WriteGuard`].

use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::game::GameId;
use crate::ratings::RatingRecord;
use crate::write_guard::WriteGuard;

/// Number of trip characters shown in public rating listings.
const TRIP_DISPLAY_LEN: usize = 9;

/// Monotonic per-connection identifier, assigned at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identity and rating record of a player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerIdentity {
    name: String,
    secret: Option<String>,
    identity_token: Option<String>,
    trip: Option<String>,
    rating: i32,
    wins: u32,
    losses: u32,
    rating_changed_at: Option<DateTime<Utc>>,
    last_game_win: bool,
}

impl PlayerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: None,
            identity_token: None,
            trip: None,
            rating: 0,
            wins: 0,
            losses: 0,
            rating_changed_at: None,
            last_game_win: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier in the rating system: `name+hexdigest(secret)`.
    pub fn identity_token(&self) -> Option<&str> {
        self.identity_token.as_deref()
    }

    /// The trimmed secret, if one was supplied at login.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn rating(&self) -> i32 {
        self.rating
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    pub fn last_game_win(&self) -> bool {
        self.last_game_win
    }

    /// Last time the rating changed; "now" if it never has.
    pub fn rating_changed_at(&self) -> DateTime<Utc> {
        self.rating_changed_at.unwrap_or_else(Utc::now)
    }

    /// Sets up the identity token from the secret part of the LOGIN password.
    /// An empty secret makes the player unrated.
    pub fn set_secret(&mut self, raw: &str) {
        if raw.is_empty() {
            self.secret = None;
            self.identity_token = None;
            self.trip = None;
            return;
        }
        let secret = raw.trim().to_string();
        let trip = hex::encode(Sha256::digest(secret.as_bytes()));
        self.identity_token = Some(format!("{}+{}", self.name, trip));
        self.trip = Some(trip);
        self.secret = Some(secret);
    }

    /// Reinstates a stored `name+trip` token without knowing the secret.
    pub(crate) fn restore_token(&mut self, token: &str) {
        let trip = token
            .strip_prefix(&format!("{}+", self.name))
            .or_else(|| token.split_once('+').map(|(_, trip)| trip))
            .unwrap_or(token);
        self.trip = Some(trip.to_string());
        self.identity_token = Some(token.to_string());
    }

    /// Updates the rating. The change timestamp moves only when the value does.
    pub fn set_rating(&mut self, rating: i32) {
        if self.rating != rating {
            self.rating = rating;
            self.rating_changed_at = Some(Utc::now());
        }
    }

    pub fn is_rated(&self) -> bool {
        self.identity_token.is_some()
    }

    /// Name shown in public listings. Rated players get a shortened trip
    /// instead of the full token so the digest is not published.
    pub fn display_identity(&self) -> String {
        match &self.trip {
            Some(trip) => {
                let base = self.name.split('@').next().unwrap_or(&self.name);
                let short: String = trip.chars().take(TRIP_DISPLAY_LEN).collect();
                format!("{base}+{short}")
            }
            None => self.name.clone(),
        }
    }

    /// Rating-adjustment entry point, called by the game engine once a game
    /// has a result.
    pub fn record_result(&mut self, won: bool) {
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.last_game_win = won;
    }

    /// Restores stored rating values for this identity.
    pub fn apply_record(&mut self, record: &RatingRecord) {
        self.rating = record.rate;
        self.wins = record.win;
        self.losses = record.loss;
        self.rating_changed_at = record.modified_at;
        self.last_game_win = record.last_game_win;
    }
}

/// First (sente, `+`) or second (gote, `-`) player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sente,
    Gote,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Sente => Side::Gote,
            Side::Gote => Side::Sente,
        }
    }

    pub fn marker(self) -> char {
        match self {
            Side::Sente => '+',
            Side::Gote => '-',
        }
    }

    /// Parses a TEBAN marker: `+`, `-`, or `*` for no preference.
    pub fn parse_preference(s: &str) -> Option<Option<Side>> {
        match s {
            "+" => Some(Some(Side::Sente)),
            "-" => Some(Some(Side::Gote)),
            "*" => Some(None),
            _ => None,
        }
    }
}

/// Marker used in WHO listings and error messages.
pub fn side_marker(side: Option<Side>) -> char {
    side.map_or('*', Side::marker)
}

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connected,
    GameWaiting,
    AgreeWaiting,
    StartWaiting,
    Game,
    Finished,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Connected => "connected",
            Status::GameWaiting => "game_waiting",
            Status::AgreeWaiting => "agree_waiting",
            Status::StartWaiting => "start_waiting",
            Status::Game => "game",
            Status::Finished => "finished",
        }
    }

    /// Statuses in which the player is bound to a game name.
    pub fn is_engaged(self) -> bool {
        matches!(
            self,
            Status::GameWaiting | Status::AgreeWaiting | Status::StartWaiting | Status::Game
        )
    }

    /// Statuses that accept a GAME or CHALLENGE request.
    pub fn accepts_game_request(self) -> bool {
        matches!(self, Status::Connected | Status::GameWaiting)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line-protocol dialect spoken by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain CSA protocol: the connection ends with the game, no chat.
    Csa,
    /// CSA with the x1 extensions (`%%` commands, chat, monitoring).
    X1,
}

impl Protocol {
    pub fn closes_on_game_end(self) -> bool {
        self == Protocol::Csa
    }

    pub fn accepts_chat(self) -> bool {
        self == Protocol::X1
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Csa => f.write_str("CSA"),
            Protocol::X1 => f.write_str("x1"),
        }
    }
}

/// A logged-in connection as seen by the rest of the server.
pub struct Player {
    pub session: SessionId,
    pub identity: PlayerIdentity,
    pub status: Status,
    pub protocol: Protocol,
    pub game_name: String,
    /// Desired side while waiting, assigned side once paired.
    pub sente: Option<Side>,
    pub game: Option<GameId>,
    out: WriteGuard,
    cancel: watch::Sender<bool>,
}

impl Player {
    pub fn new(
        session: SessionId,
        identity: PlayerIdentity,
        protocol: Protocol,
        out: WriteGuard,
        cancel: watch::Sender<bool>,
    ) -> Self {
        Self {
            session,
            identity,
            status: Status::Connected,
            protocol,
            game_name: String::new(),
            sente: None,
            game: None,
            out,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn write_safe(&self, text: &str) {
        self.out.write_safe(text);
    }

    /// Drops the game binding and goes back to the lobby.
    pub fn leave_game(&mut self) {
        self.game = None;
        self.game_name.clear();
        self.sente = None;
        if self.status != Status::Finished {
            self.status = Status::Connected;
        }
    }

    /// Marks the player finished and signals its connection task to stop.
    pub fn finish(&mut self) {
        if self.status != Status::Finished {
            self.status = Status::Finished;
            tracing::info!(player = %self.name(), session = %self.session, "user finish");
            self.cancel.send_replace(true);
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = self
            .identity
            .identity_token()
            .unwrap_or_else(|| self.identity.name());
        if self.status.is_engaged() {
            write!(
                f,
                "{who} {} {} {} {}",
                self.protocol,
                self.status,
                self.game_name,
                side_marker(self.sente)
            )
        } else {
            write!(f, "{who} {} {}", self.protocol, self.status)
        }
    }
}
