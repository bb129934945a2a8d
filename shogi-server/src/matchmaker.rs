//! Pairing of `%%GAME` / `%%CHALLENGE` requests.
//!
//! Runs under the league lock. The requester is either parked in
//! `game_waiting`, refused, or paired with the first compatible waiting
//! rival in login order, in which case the sides are settled and the game
//! factory takes both players into the AGREE handshake.

use rand::Rng;

use crate::command::{RequestKind, is_floodgate_name, is_good_game_name};
use crate::game::GameId;
use crate::league::League;
use crate::player::{SessionId, Side, Status, side_marker};

/// Refused requests. `Display` is the line sent to the requester.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("##[ERROR] bad game name")]
    BadGameName,
    #[error("##[ERROR] you are in {0} status. GAME is valid in connected or game_waiting status")]
    WrongStatus(Status),
    #[error("##[ERROR] You are not allowed to specify TEBAN {side} for the game {game_name}")]
    SideNotAllowed { side: char, game_name: String },
    #[error("##[ERROR] can't find rival for {0}")]
    NoRival(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No rival yet; the requester waits with its side preference.
    Waiting,
    Paired(GameId),
}

pub fn request_game<R: Rng + ?Sized>(
    league: &mut League,
    session: SessionId,
    kind: RequestKind,
    game_name: &str,
    side: Option<Side>,
    rng: &mut R,
) -> Result<MatchOutcome, MatchError> {
    if !is_good_game_name(game_name) {
        return Err(MatchError::BadGameName);
    }
    let status = league
        .players
        .get(session)
        .map_or(Status::Finished, |p| p.status);
    if !status.accepts_game_request() {
        return Err(MatchError::WrongStatus(status));
    }

    let side = if is_floodgate_name(game_name) {
        if side.is_some() {
            return Err(MatchError::SideNotAllowed {
                side: side_marker(side),
                game_name: game_name.to_string(),
            });
        }
        None
    } else {
        side
    };

    let Some(rival) = league.find_waiting(game_name, side.map(Side::opposite), session) else {
        return park(league, session, kind, game_name, side);
    };
    let rival_side = league.players.get(rival).and_then(|p| p.sente);
    let (mine, theirs) = match (side, rival_side) {
        (None, None) => {
            if rng.gen_bool(0.5) {
                (Side::Sente, Side::Gote)
            } else {
                (Side::Gote, Side::Sente)
            }
        }
        // A rival that committed to a side first keeps it.
        (_, Some(theirs)) => (theirs.opposite(), theirs),
        (Some(mine), None) => (mine, mine.opposite()),
    };
    for (who, assigned) in [(session, mine), (rival, theirs)] {
        if let Some(player) = league.players.get_mut(who) {
            player.game_name = game_name.to_string();
            player.sente = Some(assigned);
        }
    }
    let (sente, gote) = if mine == Side::Sente {
        (session, rival)
    } else {
        (rival, session)
    };
    let id = league.create_game(game_name, sente, gote);
    tracing::info!(%session, %rival, game = %id, "paired players");
    Ok(MatchOutcome::Paired(id))
}

fn park(
    league: &mut League,
    session: SessionId,
    kind: RequestKind,
    game_name: &str,
    side: Option<Side>,
) -> Result<MatchOutcome, MatchError> {
    let Some(player) = league.players.get_mut(session) else {
        return Err(MatchError::WrongStatus(Status::Finished));
    };
    match kind {
        RequestKind::Game => {
            player.status = Status::GameWaiting;
            player.game_name = game_name.to_string();
            player.sente = side;
            tracing::debug!(%session, game_name, side = %side_marker(side), "waiting for a rival");
            Ok(MatchOutcome::Waiting)
        }
        RequestKind::Challenge => {
            player.status = Status::Connected;
            player.game_name.clear();
            player.sente = None;
            Err(MatchError::NoRival(game_name.to_string()))
        }
    }
}
