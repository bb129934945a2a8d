//! Shared registries: logged-in players, running games, stored ratings.
//!
//! The whole [`League`] sits behind one process-wide lock
//! (`SharedState::league`). A connection takes it for exactly one dispatch
//! step, so everything in here is plain synchronous code that never awaits.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;

use crate::game::{Game, GameFactory, GameId, GameSetup};
use crate::player::{Player, PlayerIdentity, SessionId, Side, Status};
use crate::ratings::{RatingRecord, RatingTable};

/// Logged-in players in login order, with a name index.
#[derive(Default)]
pub struct Players {
    by_session: BTreeMap<SessionId, Player>,
    by_name: HashMap<String, SessionId>,
}

impl Players {
    pub fn insert(&mut self, player: Player) {
        self.by_name.insert(player.name().to_string(), player.session);
        self.by_session.insert(player.session, player);
    }

    pub fn remove(&mut self, session: SessionId) -> Option<Player> {
        let player = self.by_session.remove(&session)?;
        if self.by_name.get(player.name()) == Some(&session) {
            self.by_name.remove(player.name());
        }
        Some(player)
    }

    pub fn get(&self, session: SessionId) -> Option<&Player> {
        self.by_session.get(&session)
    }

    pub fn get_mut(&mut self, session: SessionId) -> Option<&mut Player> {
        self.by_session.get_mut(&session)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.by_session.values()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.by_session.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

pub struct League {
    pub players: Players,
    games: BTreeMap<GameId, Box<dyn Game>>,
    ratings: RatingTable,
    factory: Box<dyn GameFactory>,
    next_session: u64,
}

impl League {
    pub fn new(factory: Box<dyn GameFactory>, ratings: RatingTable) -> Self {
        Self {
            players: Players::default(),
            games: BTreeMap::new(),
            ratings,
            factory,
            next_session: 1,
        }
    }

    pub fn next_session_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        id
    }

    /// Registers a logged-in player. A name that is already logged in is
    /// refused and the player handed back.
    pub fn add(&mut self, player: Player) -> Result<(), Box<Player>> {
        if self.players.contains_name(player.name()) {
            return Err(Box::new(player));
        }
        tracing::info!(player = %player.name(), session = %player.session, "player joined the league");
        self.players.insert(player);
        Ok(())
    }

    pub fn rating_record(&self, identity_token: &str) -> Option<&RatingRecord> {
        self.ratings.get(identity_token)
    }

    pub fn game(&self, id: &str) -> Option<&dyn Game> {
        self.games.get(id).map(|g| g.as_ref())
    }

    pub fn game_ids(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }

    /// Runs `f` against a game and the player registry. Games that report
    /// themselves finished afterwards are dropped from the registry.
    pub fn with_game<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut dyn Game, &mut Players) -> R,
    ) -> Option<R> {
        let game = self.games.get_mut(id)?;
        let result = f(game.as_mut(), &mut self.players);
        if game.is_finished() {
            self.games.remove(id);
            tracing::debug!(game = %id, "game removed from the league");
        }
        Some(result)
    }

    /// First waiting player (in login order) for `game_name` whose side fits.
    /// `wanted` is the side the rival must play; `None` accepts any rival.
    pub fn find_waiting(
        &self,
        game_name: &str,
        wanted: Option<Side>,
        searcher: SessionId,
    ) -> Option<SessionId> {
        self.players
            .iter()
            .find(|p| {
                p.session != searcher
                    && p.status == Status::GameWaiting
                    && p.game_name == game_name
                    && (wanted.is_none() || p.sente.is_none() || p.sente == wanted)
            })
            .map(|p| p.session)
    }

    /// Binds two paired players into a new game built by the factory.
    pub fn create_game(&mut self, game_name: &str, sente: SessionId, gote: SessionId) -> GameId {
        let name_of = |session| {
            self.players
                .get(session)
                .map(|p| p.name().to_string())
                .unwrap_or_default()
        };
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let base = format!("{game_name}+{}+{}+{stamp}", name_of(sente), name_of(gote));
        let mut id = base.clone();
        let mut n = 1;
        while self.games.contains_key(&id) {
            n += 1;
            id = format!("{base}-{n}");
        }
        let setup = GameSetup {
            id: id.clone(),
            game_name: game_name.to_string(),
            sente,
            gote,
        };
        let game = self.factory.create(setup, &mut self.players);
        self.games.insert(id.clone(), game);
        id
    }

    /// Rated players for the rating listing: stored records in table order,
    /// with live data replacing the stored values of logged-in players, then
    /// rated players the table does not know yet.
    pub fn rated_players(&self) -> Vec<PlayerIdentity> {
        let live: HashMap<&str, &PlayerIdentity> = self
            .players
            .iter()
            .filter_map(|p| p.identity.identity_token().map(|t| (t, &p.identity)))
            .collect();
        let mut listed = HashSet::new();
        let mut out = Vec::with_capacity(self.ratings.len() + live.len());
        for (id, stored) in self.ratings.identities() {
            match live.get(id) {
                Some(identity) => {
                    listed.insert(id);
                    out.push((*identity).clone());
                }
                None => out.push(stored),
            }
        }
        for player in self.players.iter() {
            if let Some(token) = player.identity.identity_token()
                && !listed.contains(token)
            {
                out.push(player.identity.clone());
            }
        }
        out
    }

    /// Administrative kill: the player's game is told, the player finished,
    /// and its connection task signalled to stop.
    pub fn kill(&mut self, session: SessionId) {
        let Some(player) = self.players.get(session) else {
            return;
        };
        tracing::info!(player = %player.name(), %session, "user {} killed", player.name());
        if let Some(game_id) = player.game.clone() {
            self.with_game(&game_id, |game, players| game.kill(players, session));
        }
        if let Some(player) = self.players.get_mut(session) {
            player.finish();
        }
    }

    pub fn kill_all(&mut self) {
        for session in self.players.sessions() {
            self.kill(session);
        }
    }

    /// Connection teardown: abandons the player's game, drops its monitor
    /// subscriptions and removes it from the registry.
    pub fn disconnect(&mut self, session: SessionId) -> Option<Player> {
        let game_id = self.players.get(session)?.game.clone();
        if let Some(game_id) = game_id {
            self.with_game(&game_id, |game, players| game.kill(players, session));
        }
        for game in self.games.values_mut() {
            game.monitor_off(session);
        }
        let mut player = self.players.remove(session)?;
        player.finish();
        tracing::info!(player = %player.name(), %session, "player left the league");
        Some(player)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{drain, join, league};
    use super::*;
    use crate::player::Protocol;
    use crate::ratings::RatingRecord;

    #[test]
    fn duplicate_names_are_refused() {
        let mut league = league();
        join(&mut league, "alice", Protocol::X1);
        let session = league.next_session_id();
        let (again, _out) = testing::player(session, "alice", Protocol::Csa);
        let refused = league.add(again).unwrap_err();
        assert_eq!(refused.session, session);
        assert_eq!(league.players.len(), 1);
    }

    #[test]
    fn find_waiting_respects_sides_and_order() {
        let mut league = league();
        let (a, _) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::X1);
        let (c, _) = join(&mut league, "carol", Protocol::X1);
        for (session, side) in [(a, Some(Side::Sente)), (b, None)] {
            let p = league.players.get_mut(session).unwrap();
            p.status = Status::GameWaiting;
            p.game_name = "blitz".into();
            p.sente = side;
        }

        assert_eq!(league.find_waiting("blitz", None, c), Some(a));
        assert_eq!(league.find_waiting("blitz", Some(Side::Sente), c), Some(a));
        // alice wants sente, so she does not fit a rival that must be gote;
        // bob has no preference and does.
        assert_eq!(league.find_waiting("blitz", Some(Side::Gote), c), Some(b));
        assert_eq!(league.find_waiting("blitz", None, a), Some(b));
        assert_eq!(league.find_waiting("rapid", None, c), None);
    }

    #[test]
    fn create_game_registers_and_binds_players() {
        let mut league = league();
        let (a, mut a_out) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::X1);
        let id = league.create_game("blitz", a, b);
        assert!(id.starts_with("blitz+alice+bob+"));
        assert_eq!(league.game_ids().collect::<Vec<_>>(), vec![id.as_str()]);
        assert_eq!(league.players.get(a).unwrap().game.as_deref(), Some(id.as_str()));
        assert!(drain(&mut a_out).contains(&format!("Game_ID:{id}")));
    }

    #[test]
    fn finished_games_leave_the_registry() {
        let mut league = league();
        let (a, _) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::X1);
        let id = league.create_game("blitz", a, b);
        league.with_game(&id, |game, players| game.reject(players, "bob"));
        assert!(league.game(&id).is_none());
        assert_eq!(league.players.get(a).unwrap().status, Status::Connected);
    }

    #[test]
    fn kill_notifies_opponent_and_finishes_player() {
        let mut league = league();
        let (a, mut a_out) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::X1);
        let id = league.create_game("blitz", a, b);
        league.with_game(&id, |game, players| game.start(players));
        drain(&mut a_out);

        league.kill(b);
        assert_eq!(league.players.get(b).unwrap().status, Status::Finished);
        assert_eq!(drain(&mut a_out), vec!["#ABNORMAL", "#WIN"]);
        assert!(league.game(&id).is_none());
    }

    #[test]
    fn disconnect_removes_player_and_monitors() {
        let mut league = league();
        let (a, _) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::X1);
        let (c, _) = join(&mut league, "carol", Protocol::X1);
        let id = league.create_game("blitz", a, b);
        league.with_game(&id, |game, _| game.monitor_on(c));

        let gone = league.disconnect(c).unwrap();
        assert_eq!(gone.status, Status::Finished);
        assert!(!league.players.contains_name("carol"));
        assert!(league.game(&id).is_some());
        assert!(league.disconnect(c).is_none());
    }

    #[test]
    fn rated_players_merge_table_and_live_data() {
        let table = RatingTable::from_records(vec![
            RatingRecord {
                id: "zed+abc".into(),
                name: "zed".into(),
                rate: 1200,
                win: 1,
                loss: 1,
                modified_at: None,
                last_game_win: false,
            },
        ]);
        let mut league = League::new(
            Box::new(crate::game::RelayGameFactory {
                move_time_limit: std::time::Duration::from_secs(60),
            }),
            table,
        );
        let (a, _) = join(&mut league, "alice", Protocol::X1);
        join(&mut league, "guest", Protocol::X1);
        league.players.get_mut(a).unwrap().identity.set_secret("pw");

        let rated = league.rated_players();
        let names: Vec<_> = rated.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["zed", "alice"]);
    }
}
