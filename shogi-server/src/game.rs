//! Game engine boundary and the built-in relay engine.
//!
//! The connection layer only talks to games through the [`Game`] trait and
//! creates them through a [`GameFactory`]. Games are owned by the league and
//! players refer to them by [`GameId`], so a game never outlives its entry
//! in the registry.
//!
//! [`RelayGame`] is the engine the server runs with by default. It tracks
//! whose turn it is, relays moves between the two players and any monitors,
//! and ends the game on resignation, time-up or abnormal termination. It
//! does not know the rules of shogi: move legality belongs to a real engine
//! plugged in through [`GameFactory`].

use std::time::{Duration, Instant};

use crate::league::Players;
use crate::player::{SessionId, Side, Status};

pub type GameId = String;

/// Input forwarded to a game by a player's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveInput<'a> {
    /// A move (`+7776FU`) or special command (`%TORYO`).
    Text(&'a str),
    /// The player's read wait expired during the game.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Continue,
    /// Not the mover's turn; the caller keeps the line for later.
    Deferred,
    /// The game is over.
    Ended,
}

pub trait Game: Send {
    fn id(&self) -> &str;
    fn sente(&self) -> SessionId;
    fn gote(&self) -> SessionId;
    fn is_turn(&self, session: SessionId) -> bool;
    fn handle_move(&mut self, players: &mut Players, input: MoveInput<'_>, by: SessionId) -> MoveOutcome;
    fn start(&mut self, players: &mut Players);
    fn reject(&mut self, players: &mut Players, by_name: &str);
    /// `by` is going away; the opponent must be told.
    fn kill(&mut self, players: &mut Players, by: SessionId);
    /// Textual snapshot, one item per line.
    fn show(&self) -> String;
    fn monitor_on(&mut self, session: SessionId);
    fn monitor_off(&mut self, session: SessionId);
    fn append_comment(&mut self, comment: &str);
    fn is_finished(&self) -> bool;
}

/// Everything a factory needs to bind two paired players into a game.
#[derive(Debug, Clone)]
pub struct GameSetup {
    pub id: GameId,
    pub game_name: String,
    pub sente: SessionId,
    pub gote: SessionId,
}

pub trait GameFactory: Send + Sync {
    /// Creates the game and moves both players into the AGREE handshake.
    fn create(&self, setup: GameSetup, players: &mut Players) -> Box<dyn Game>;
}

pub struct RelayGameFactory {
    pub move_time_limit: Duration,
}

impl GameFactory for RelayGameFactory {
    fn create(&self, setup: GameSetup, players: &mut Players) -> Box<dyn Game> {
        Box::new(RelayGame::new(setup, players, self.move_time_limit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshake,
    Playing,
    Finished,
}

pub struct RelayGame {
    id: GameId,
    sente: SessionId,
    gote: SessionId,
    sente_name: String,
    gote_name: String,
    phase: Phase,
    to_move: Side,
    turn_started: Instant,
    move_time_limit: Duration,
    /// Moves and comments in game order.
    record: Vec<String>,
    monitors: Vec<SessionId>,
}

impl RelayGame {
    pub fn new(setup: GameSetup, players: &mut Players, move_time_limit: Duration) -> Self {
        let name_of = |players: &Players, session: SessionId| {
            players
                .get(session)
                .map(|p| p.name().to_string())
                .unwrap_or_default()
        };
        let game = Self {
            sente_name: name_of(&*players, setup.sente),
            gote_name: name_of(&*players, setup.gote),
            id: setup.id,
            sente: setup.sente,
            gote: setup.gote,
            phase: Phase::Handshake,
            to_move: Side::Sente,
            turn_started: Instant::now(),
            move_time_limit,
            record: Vec::new(),
            monitors: Vec::new(),
        };
        for (session, side) in [(game.sente, Side::Sente), (game.gote, Side::Gote)] {
            if let Some(player) = players.get_mut(session) {
                player.status = Status::AgreeWaiting;
                player.game = Some(game.id.clone());
                player.game_name = setup.game_name.clone();
                player.sente = Some(side);
                player.write_safe(&game.summary(side));
            }
        }
        tracing::info!(game = %game.id, sente = %game.sente_name, gote = %game.gote_name, "game created");
        game
    }

    fn session_of(&self, side: Side) -> SessionId {
        match side {
            Side::Sente => self.sente,
            Side::Gote => self.gote,
        }
    }

    fn side_of(&self, session: SessionId) -> Option<Side> {
        if session == self.sente {
            Some(Side::Sente)
        } else if session == self.gote {
            Some(Side::Gote)
        } else {
            None
        }
    }

    fn summary(&self, side: Side) -> String {
        format!(
            "BEGIN Game_Summary\n\
             Protocol_Version:1.1\n\
             Protocol_Mode:Server\n\
             Format:Shogi 1.0\n\
             Declaration:Jishogi 1.1\n\
             Game_ID:{}\n\
             Name+:{}\n\
             Name-:{}\n\
             Your_Turn:{}\n\
             To_Move:+\n\
             BEGIN Time\n\
             Time_Unit:1sec\n\
             Total_Time:0\n\
             Byoyomi:{}\n\
             Least_Time_Per_Move:0\n\
             END Time\n\
             BEGIN Position\n\
             PI\n\
             +\n\
             END Position\n\
             END Game_Summary\n",
            self.id,
            self.sente_name,
            self.gote_name,
            side.marker(),
            self.move_time_limit.as_secs(),
        )
    }

    fn broadcast(&self, players: &Players, line: &str) {
        for session in [self.sente, self.gote] {
            if let Some(player) = players.get(session) {
                player.write_safe(&format!("{line}\n"));
            }
        }
        for session in &self.monitors {
            if let Some(player) = players.get(*session) {
                player.write_safe(&format!("##[MONITOR][{}] {line}\n", self.id));
            }
        }
    }

    fn tell(&self, players: &Players, session: SessionId, line: &str) {
        if let Some(player) = players.get(session) {
            player.write_safe(&format!("{line}\n"));
        }
    }

    /// Announces the result, records it, and releases both players.
    fn conclude(&mut self, players: &mut Players, winner: Side, reason: &[&str]) {
        for line in reason {
            self.broadcast(players, line);
        }
        self.tell(players, self.session_of(winner), "#WIN");
        self.tell(players, self.session_of(winner.opposite()), "#LOSE");
        self.record.push(format!("'result {} win", winner.marker()));
        self.record_results(players, winner);
        self.release(players);
        tracing::info!(game = %self.id, winner = ?winner, "game finished");
    }

    /// Opponent of `winner` disappeared mid-game.
    fn conclude_abnormal(&mut self, players: &mut Players, winner: Side) {
        self.tell(players, self.session_of(winner), "#ABNORMAL");
        self.tell(players, self.session_of(winner), "#WIN");
        for session in &self.monitors {
            if let Some(player) = players.get(*session) {
                player.write_safe(&format!("##[MONITOR][{}] #ABNORMAL\n", self.id));
            }
        }
        self.record_results(players, winner);
        self.release(players);
        tracing::info!(game = %self.id, winner = ?winner, "game abnormally finished");
    }

    fn record_results(&self, players: &mut Players, winner: Side) {
        for side in [Side::Sente, Side::Gote] {
            if let Some(player) = players.get_mut(self.session_of(side)) {
                player.identity.record_result(side == winner);
            }
        }
    }

    fn release(&mut self, players: &mut Players) {
        self.phase = Phase::Finished;
        for session in [self.sente, self.gote] {
            if let Some(player) = players.get_mut(session) {
                let owned = player.game.as_deref() == Some(self.id.as_str());
                if owned {
                    player.leave_game();
                    if player.protocol.closes_on_game_end() {
                        player.finish();
                    }
                }
            }
        }
    }

    fn elapsed_secs(&self) -> u64 {
        self.turn_started.elapsed().as_secs()
    }
}

impl Game for RelayGame {
    fn id(&self) -> &str {
        &self.id
    }

    fn sente(&self) -> SessionId {
        self.sente
    }

    fn gote(&self) -> SessionId {
        self.gote
    }

    fn is_turn(&self, session: SessionId) -> bool {
        self.phase == Phase::Playing && self.session_of(self.to_move) == session
    }

    fn handle_move(&mut self, players: &mut Players, input: MoveInput<'_>, by: SessionId) -> MoveOutcome {
        if self.phase != Phase::Playing {
            return MoveOutcome::Continue;
        }
        if !self.is_turn(by) {
            return match input {
                MoveInput::Timeout => MoveOutcome::Continue,
                MoveInput::Text(text) => {
                    tracing::warn!(game = %self.id, session = %by, "Deferred a move [{text}] since it is not the player's turn");
                    MoveOutcome::Deferred
                }
            };
        }
        let mover = self.to_move;
        match input {
            MoveInput::Timeout => {
                if self.turn_started.elapsed() < self.move_time_limit {
                    return MoveOutcome::Continue;
                }
                self.record.push("%TIME_UP".to_string());
                self.conclude(players, mover.opposite(), &["#TIME_UP"]);
                MoveOutcome::Ended
            }
            MoveInput::Text("%TORYO") => {
                let line = format!("%TORYO,T{}", self.elapsed_secs());
                self.record.push(line.clone());
                self.conclude(players, mover.opposite(), &[line.as_str(), "#RESIGN"]);
                MoveOutcome::Ended
            }
            MoveInput::Text(special) if special.starts_with('%') => {
                self.tell(players, by, &format!("##[ERROR] unsupported special move {special}"));
                MoveOutcome::Continue
            }
            MoveInput::Text(mv) => {
                let line = format!("{mv},T{}", self.elapsed_secs());
                self.broadcast(players, &line);
                self.record.push(line);
                self.to_move = mover.opposite();
                self.turn_started = Instant::now();
                MoveOutcome::Continue
            }
        }
    }

    fn start(&mut self, players: &mut Players) {
        self.phase = Phase::Playing;
        self.to_move = Side::Sente;
        self.turn_started = Instant::now();
        let line = format!("START:{}", self.id);
        self.tell(players, self.sente, &line);
        self.tell(players, self.gote, &line);
        tracing::info!(game = %self.id, "game started");
    }

    fn reject(&mut self, players: &mut Players, by_name: &str) {
        let line = format!("REJECT:{} by {by_name}", self.id);
        self.tell(players, self.sente, &line);
        self.tell(players, self.gote, &line);
        tracing::info!(game = %self.id, by = %by_name, "game rejected");
        self.release(players);
    }

    fn kill(&mut self, players: &mut Players, by: SessionId) {
        match self.phase {
            Phase::Finished => {}
            Phase::Handshake => {
                let name = players
                    .get(by)
                    .map(|p| p.name().to_string())
                    .unwrap_or_default();
                self.reject(players, &name);
            }
            Phase::Playing => {
                let Some(loser) = self.side_of(by) else {
                    return;
                };
                self.record.push("%CHUDAN".to_string());
                self.conclude_abnormal(players, loser.opposite());
            }
        }
    }

    fn show(&self) -> String {
        let status = match self.phase {
            Phase::Handshake => "agree_waiting",
            Phase::Playing => "game",
            Phase::Finished => "finished",
        };
        let mut out = format!(
            "Game_ID:{}\nName+:{}\nName-:{}\nStatus:{status}\nTo_Move:{}\n",
            self.id,
            self.sente_name,
            self.gote_name,
            self.to_move.marker(),
        );
        for line in &self.record {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn monitor_on(&mut self, session: SessionId) {
        if !self.monitors.contains(&session) {
            self.monitors.push(session);
        }
    }

    fn monitor_off(&mut self, session: SessionId) {
        self.monitors.retain(|s| *s != session);
    }

    fn append_comment(&mut self, comment: &str) {
        self.record.push(comment.to_string());
    }

    fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }
}
