//! One read loop step: deferred-turn handling, then the command table.
//!
//! Everything here runs under the league lock and never awaits.

use super::queries::{
    handle_chat, handle_help, handle_list, handle_monitor_off, handle_monitor_on, handle_rating,
    handle_show, handle_version, handle_who,
};
use super::{Input, Session};
use crate::command::Command;
use crate::game::{MoveInput, MoveOutcome};
use crate::league::League;
use crate::matchmaker::{MatchError, request_game};
use crate::player::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub fn step(session: &mut Session, league: &mut League, input: Input) -> Flow {
    let Some(player) = league.players.get(session.id) else {
        return Flow::Stop;
    };
    let status = player.status;

    let input = if status == Status::Game {
        let my_turn = player
            .game
            .as_deref()
            .and_then(|id| league.game(id))
            .is_some_and(|game| game.is_turn(session.id));
        if my_turn && !matches!(input, Input::Failed) {
            if input != Input::Poll {
                session.pending.push(input);
            }
            match session.pending.pop() {
                Some(next) => next,
                None => return Flow::Continue,
            }
        } else {
            input
        }
    } else {
        session.pending.clear();
        input
    };

    if status == Status::Finished {
        return Flow::Stop;
    }

    match input {
        Input::Poll => Flow::Continue,
        Input::Failed => {
            tracing::error!(session = %session.id, "Failed to receive a message from {}.", session.name);
            Flow::Stop
        }
        Input::Timeout if status == Status::Game => {
            forward(session, league, MoveInput::Timeout, None, None)
        }
        Input::Timeout => {
            tracing::info!(session = %session.id, player = %session.name, "read timed out outside a game");
            Flow::Stop
        }
        Input::Line(line) => run(session, league, Command::parse(&line), &line),
    }
}

fn run(session: &mut Session, league: &mut League, command: Command, line: &str) -> Flow {
    let me = session.id;
    let Some(player) = league.players.get(me) else {
        return Flow::Stop;
    };
    let status = player.status;
    let protocol = player.protocol;
    let reply = |league: &League, text: &str| {
        if let Some(player) = league.players.get(me) {
            player.write_safe(text);
        }
    };

    match command {
        Command::KeepAlive => reply(league, "\n"),
        Command::Move { mv, comment } => {
            if status == Status::Game {
                return forward(session, league, MoveInput::Text(&mv), Some(line), comment.as_deref());
            }
        }
        Command::Special(text) => {
            if status == Status::Game {
                return forward(session, league, MoveInput::Text(&text), Some(line), None);
            }
        }
        Command::Reject => {
            if status == Status::AgreeWaiting {
                if let Some(id) = player.game.clone() {
                    let name = session.name.clone();
                    league.with_game(&id, |game, players| game.reject(players, &name));
                }
                if protocol.closes_on_game_end() {
                    return Flow::Stop;
                }
            } else {
                reply(
                    league,
                    &format!("##[ERROR] you are in {status} status. REJECT is valid in agree_waiting status\n"),
                );
            }
        }
        Command::Agree => {
            if status == Status::AgreeWaiting {
                agree(session, league);
            } else {
                reply(
                    league,
                    &format!("##[ERROR] you are in {status} status. AGREE is valid in agree_waiting status\n"),
                );
            }
        }
        Command::Show(id) => handle_show(league, me, &id),
        Command::MonitorOn(id) => handle_monitor_on(league, me, &id),
        Command::MonitorOff(id) => handle_monitor_off(league, me, &id),
        Command::Help => handle_help(league, me),
        Command::Rating => handle_rating(league, me),
        Command::Version => handle_version(league, me),
        Command::CancelGame => {
            if status.accepts_game_request() {
                if let Some(player) = league.players.get_mut(me) {
                    player.status = Status::Connected;
                    player.game_name.clear();
                    player.sente = None;
                }
            } else {
                reply(league, &format!("{}\n", MatchError::WrongStatus(status)));
            }
        }
        Command::RequestGame {
            kind,
            game_name,
            side,
        } => {
            if let Err(e) = request_game(league, me, kind, &game_name, side, &mut session.rng) {
                tracing::debug!(session = %me, "game request refused: {e}");
                reply(league, &format!("{e}\n"));
            }
        }
        Command::Chat(text) => handle_chat(league, me, &text),
        Command::List => handle_list(league, me),
        Command::Who => handle_who(league, me),
        Command::Logout => {
            if let Some(player) = league.players.get_mut(me) {
                player.status = Status::Connected;
            }
            reply(league, "LOGOUT:completed\n");
            return Flow::Stop;
        }
        Command::Challenge => reply(league, "CHALLENGE ACCEPTED\n"),
        Command::Blank => {}
        Command::Unknown(text) => {
            let msg = format!("##[ERROR] unknown command {text}");
            reply(league, &format!("{msg}\n"));
            tracing::error!(session = %me, "{msg}");
        }
    }
    Flow::Continue
}

/// Hands a move, special command or timeout to the player's game.
fn forward(
    session: &mut Session,
    league: &mut League,
    input: MoveInput<'_>,
    raw: Option<&str>,
    comment: Option<&str>,
) -> Flow {
    let me = session.id;
    let Some(player) = league.players.get(me) else {
        return Flow::Stop;
    };
    let protocol = player.protocol;
    let Some(id) = player.game.clone() else {
        return Flow::Continue;
    };
    let outcome = league.with_game(&id, |game, players| {
        let outcome = game.handle_move(players, input, me);
        if outcome == MoveOutcome::Continue
            && let Some(comment) = comment
        {
            game.append_comment(comment);
        }
        outcome
    });
    match outcome {
        Some(MoveOutcome::Deferred) => {
            if let Some(raw) = raw {
                session.pending.push(Input::Line(raw.to_string()));
            }
            Flow::Continue
        }
        Some(MoveOutcome::Ended) if protocol.closes_on_game_end() => Flow::Stop,
        _ => Flow::Continue,
    }
}

/// AGREE in `agree_waiting`. The game starts once both sides have agreed.
fn agree(session: &Session, league: &mut League) {
    let Some(player) = league.players.get_mut(session.id) else {
        return;
    };
    player.status = Status::StartWaiting;
    let Some(id) = player.game.clone() else {
        return;
    };
    league.with_game(&id, |game, players| {
        let sides = [game.sente(), game.gote()];
        let ready = sides.iter().all(|s| {
            players
                .get(*s)
                .is_some_and(|p| p.status == Status::StartWaiting)
        });
        if ready {
            game.start(players);
            for s in sides {
                if let Some(p) = players.get_mut(s) {
                    p.status = Status::Game;
                }
            }
        }
    });
}
