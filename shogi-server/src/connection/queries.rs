//! Read-mostly `%%` commands: SHOW, MONITORON/OFF, LIST, WHO, RATING, HELP,
//! VERSION, and CHAT.

use crate::league::League;
use crate::player::SessionId;

fn reply(league: &League, session: SessionId, text: &str) {
    if let Some(player) = league.players.get(session) {
        player.write_safe(text);
    }
}

fn tagged(snapshot: &str, tag: &str) -> String {
    snapshot
        .lines()
        .map(|line| format!("{tag}{line}\n"))
        .collect()
}

pub(super) fn handle_show(league: &League, session: SessionId, game_id: &str) {
    let mut out = league
        .game(game_id)
        .map(|game| tagged(&game.show(), "##[SHOW] "))
        .unwrap_or_default();
    out.push_str("##[SHOW] +OK\n");
    reply(league, session, &out);
}

pub(super) fn handle_monitor_on(league: &mut League, session: SessionId, game_id: &str) {
    let Some(snapshot) = league.with_game(game_id, |game, _| {
        game.monitor_on(session);
        game.show()
    }) else {
        return;
    };
    let tag = format!("##[MONITOR][{game_id}] ");
    let mut out = tagged(&snapshot, &tag);
    out.push_str(&format!("{tag}+OK\n"));
    reply(league, session, &out);
}

pub(super) fn handle_monitor_off(league: &mut League, session: SessionId, game_id: &str) {
    league.with_game(game_id, |game, _| game.monitor_off(session));
}

pub(super) fn handle_help(league: &League, session: SessionId) {
    reply(
        league,
        session,
        "##[HELP] available commands \"%%WHO\", \"%%CHAT str\", \"%%GAME game_name +\", \"%%GAME game_name -\"\n",
    );
}

/// Rated players, highest rating first. Equal ratings keep listing order.
pub(super) fn handle_rating(league: &League, session: SessionId) {
    let mut players = league.rated_players();
    players.sort_by_key(|p| std::cmp::Reverse(p.rating()));
    let mut out = String::new();
    for p in &players {
        out.push_str(&format!(
            "##[RATING] {} \t {:4} @{}\n",
            p.display_identity(),
            p.rating(),
            p.rating_changed_at().format("%Y-%m-%d")
        ));
    }
    out.push_str("##[RATING] +OK\n");
    reply(league, session, &out);
}

pub(super) fn handle_version(league: &League, session: SessionId) {
    reply(
        league,
        session,
        &format!(
            "##[VERSION] Shogi Server revision {}\n##[VERSION] +OK\n",
            env!("CARGO_PKG_VERSION")
        ),
    );
}

pub(super) fn handle_list(league: &League, session: SessionId) {
    let mut out: String = league
        .game_ids()
        .map(|id| format!("##[LIST] {id}\n"))
        .collect();
    out.push_str("##[LIST] +OK\n");
    reply(league, session, &out);
}

pub(super) fn handle_who(league: &League, session: SessionId) {
    let mut out: String = league
        .players
        .iter()
        .map(|p| format!("##[WHO] {p}\n"))
        .collect();
    out.push_str("##[WHO] +OK\n");
    reply(league, session, &out);
}

pub(super) fn handle_chat(league: &League, session: SessionId, text: &str) {
    let Some(from) = league.players.get(session).map(|p| p.name().to_string()) else {
        return;
    };
    let line = format!("##[CHAT][{from}] {text}\n");
    for player in league.players.iter().filter(|p| p.protocol.accepts_chat()) {
        player.write_safe(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::testing::{drain, join, league};
    use crate::player::Protocol;
    use crate::ratings::{RatingRecord, RatingTable};

    fn record(name: &str, rate: i32) -> RatingRecord {
        RatingRecord {
            id: format!("{name}+0123456789abcdef"),
            name: name.into(),
            rate,
            win: 0,
            loss: 0,
            modified_at: "2024-03-01T00:00:00Z".parse().ok(),
            last_game_win: false,
        }
    }

    #[test]
    fn rating_lists_highest_first() {
        let table = RatingTable::from_records(vec![
            record("mid", 1500),
            record("top", 1800),
            record("low", 1200),
        ]);
        let mut league = crate::league::League::new(
            Box::new(crate::game::RelayGameFactory {
                move_time_limit: std::time::Duration::from_secs(60),
            }),
            table,
        );
        let (a, mut out) = join(&mut league, "alice", Protocol::X1);
        handle_rating(&league, a);
        assert_eq!(
            drain(&mut out),
            vec![
                "##[RATING] top+012345678 \t 1800 @2024-03-01",
                "##[RATING] mid+012345678 \t 1500 @2024-03-01",
                "##[RATING] low+012345678 \t 1200 @2024-03-01",
                "##[RATING] +OK",
            ]
        );
    }

    #[test]
    fn chat_skips_csa_players() {
        let mut league = league();
        let (a, mut a_out) = join(&mut league, "alice", Protocol::X1);
        let (_, mut b_out) = join(&mut league, "bob", Protocol::Csa);
        let (_, mut c_out) = join(&mut league, "carol", Protocol::X1);
        handle_chat(&league, a, "hello");
        assert_eq!(drain(&mut a_out), vec!["##[CHAT][alice] hello"]);
        assert!(drain(&mut b_out).is_empty());
        assert_eq!(drain(&mut c_out), vec!["##[CHAT][alice] hello"]);
    }

    #[test]
    fn who_and_list_end_with_ok() {
        let mut league = league();
        let (a, mut a_out) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::Csa);
        handle_who(&league, a);
        assert_eq!(
            drain(&mut a_out),
            vec!["##[WHO] alice x1 connected", "##[WHO] bob CSA connected", "##[WHO] +OK"]
        );

        let id = league.create_game("blitz", a, b);
        drain(&mut a_out);
        handle_list(&league, a);
        assert_eq!(
            drain(&mut a_out),
            vec![format!("##[LIST] {id}"), "##[LIST] +OK".to_string()]
        );
    }

    #[test]
    fn show_unknown_game_is_just_ok() {
        let mut league = league();
        let (a, mut out) = join(&mut league, "alice", Protocol::X1);
        handle_show(&league, a, "nope");
        assert_eq!(drain(&mut out), vec!["##[SHOW] +OK"]);
    }

    #[test]
    fn monitor_on_sends_tagged_snapshot() {
        let mut league = league();
        let (a, _) = join(&mut league, "alice", Protocol::X1);
        let (b, _) = join(&mut league, "bob", Protocol::X1);
        let (c, mut c_out) = join(&mut league, "carol", Protocol::X1);
        let id = league.create_game("blitz", a, b);

        handle_monitor_on(&mut league, c, &id);
        let lines = drain(&mut c_out);
        let tag = format!("##[MONITOR][{id}] ");
        assert_eq!(lines.first().unwrap(), &format!("{tag}Game_ID:{id}"));
        assert_eq!(lines.last().unwrap(), &format!("{tag}+OK"));

        handle_monitor_on(&mut league, c, "nope");
        assert!(drain(&mut c_out).is_empty());
    }

    #[test]
    fn version_reports_crate_version() {
        let mut league = league();
        let (a, mut out) = join(&mut league, "alice", Protocol::X1);
        handle_version(&league, a);
        let lines = drain(&mut out);
        assert_eq!(
            lines[0],
            format!("##[VERSION] Shogi Server revision {}", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(lines[1], "##[VERSION] +OK");
    }
}
