use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use rusty_chess_arena::{
    GameSession, SessionError,
    config::{BattleSettings, EngineConfig, SessionSettings, UndoPolicy},
    engine::{EngineCommand, EngineSpec},
    session::{
        BattleEnd, BattleStatus, EngineHealth, EngineTaskStatus, GameSnapshot, Mode,
        SelectOutcome,
    },
};
use shakmaty::Square;

fn fake_engine(mode: &str) -> EngineSpec {
    EngineSpec::Uci(EngineCommand {
        path: PathBuf::from("/bin/sh"),
        args: vec![
            concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_uci.sh").to_string(),
            mode.to_string(),
        ],
    })
}

/// A fake engine that appends a line to `launches` every time it starts.
fn counted_fake_engine(mode: &str, launches: &Path) -> EngineSpec {
    let EngineSpec::Uci(mut command) = fake_engine(mode) else {
        unreachable!()
    };
    command.args.push(launches.display().to_string());
    EngineSpec::Uci(command)
}

fn launch_log(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{name}-{}.launches", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn launches(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

fn settings(engine: EngineSpec) -> SessionSettings {
    SessionSettings {
        engine,
        engine_defaults: EngineConfig::new(10, 0.1),
        handshake_timeout: Duration::from_secs(2),
        grace: Duration::from_secs(1),
        battle: BattleSettings {
            pace: Duration::from_millis(5),
            max_retries: 2,
            max_plies: 200,
        },
        undo: UndoPolicy::ReturnToHuman,
        auto_reply: false,
    }
}

fn session_with(settings: SessionSettings) -> Arc<GameSession> {
    Arc::new(GameSession::new("scenario", Arc::new(settings)))
}

fn session(engine: EngineSpec) -> Arc<GameSession> {
    session_with(settings(engine))
}

async fn play(session: &GameSession, from: Square, to: Square) {
    session.apply_move(from, to, None).await.unwrap();
}

async fn wait_for_battle_end(session: &GameSession) -> GameSnapshot {
    for _ in 0..500 {
        let state = session.get_state().await;
        if state.battle.status == BattleStatus::Stopped {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("battle did not stop");
}

#[tokio::test]
async fn engine_task_goes_from_idle_to_thinking_to_completed() {
    let session = session(fake_engine("slow"));
    assert_eq!(session.get_state().await.engine_task, EngineTaskStatus::Idle);
    play(&session, Square::E2, Square::E4).await;

    let task = session.request_engine_move().await.unwrap();
    assert_eq!(
        session.get_state().await.engine_task,
        EngineTaskStatus::Thinking
    );

    let outcome = task.wait().await.unwrap();
    assert_eq!(outcome.played, "e7e5");
    assert_eq!(outcome.result, None);

    let state = session.get_state().await;
    assert_eq!(
        state.engine_task,
        EngineTaskStatus::Completed {
            best_move: "e7e5".to_string()
        }
    );
    assert_eq!(state.moves, vec!["e2e4", "e7e5"]);
    assert_eq!(state.engine.status, EngineHealth::Ready);
    // reported once, idle afterwards
    assert_eq!(session.get_state().await.engine_task, EngineTaskStatus::Idle);
    session.shutdown().await;
}

#[tokio::test]
async fn concurrent_engine_requests_admit_exactly_one() {
    let session = session(fake_engine("slow"));
    play(&session, Square::E2, Square::E4).await;

    let attempts = join_all((0..5).map(|_| session.request_engine_move())).await;
    let mut tasks = Vec::new();
    let mut busy = 0;
    for attempt in attempts {
        match attempt {
            Ok(task) => tasks.push(task),
            Err(SessionError::Busy) => busy += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(tasks.len(), 1);
    assert_eq!(busy, 4);

    // nothing else may touch the position while the engine thinks
    assert_eq!(session.undo().await, Err(SessionError::Busy));
    assert_eq!(session.new_game().await, Err(SessionError::Busy));
    assert_eq!(
        session.set_engine_config(Some(3), None).await,
        Err(SessionError::Busy)
    );

    for task in tasks {
        task.wait().await.unwrap();
    }
    assert_eq!(session.get_state().await.moves.len(), 2);
    session.shutdown().await;
}

#[tokio::test]
async fn undo_restores_the_previous_position() {
    let session = session(EngineSpec::Random);
    session.set_mode(Mode::PlayerVsPlayer).await.unwrap();
    play(&session, Square::E2, Square::E4).await;
    play(&session, Square::E7, Square::E5).await;
    let before = session.get_state().await;

    play(&session, Square::G1, Square::F3).await;
    assert_eq!(session.undo().await.unwrap(), vec!["g1f3"]);

    let after = session.get_state().await;
    assert_eq!(after.fen, before.fen);
    assert_eq!(after.moves, before.moves);
    assert_eq!(after.turn, before.turn);
}

#[tokio::test]
async fn undo_in_player_vs_engine_returns_the_move_to_the_player() {
    let session = session(EngineSpec::Random);
    let start = session.get_fen().await;
    play(&session, Square::E2, Square::E4).await;
    session.request_engine_move().await.unwrap().wait().await.unwrap();

    let undone = session.undo().await.unwrap();
    assert_eq!(undone.len(), 2);
    assert_eq!(undone[1], "e2e4");
    assert_eq!(session.get_fen().await, start);
    assert_eq!(
        session.undo().await,
        Err(SessionError::invalid_state("there is no move to undo"))
    );
}

#[tokio::test]
async fn single_ply_undo_policy_takes_back_one_move() {
    let session = session_with(SessionSettings {
        undo: UndoPolicy::SinglePly,
        ..settings(EngineSpec::Random)
    });
    play(&session, Square::E2, Square::E4).await;
    session.request_engine_move().await.unwrap().wait().await.unwrap();

    assert_eq!(session.undo().await.unwrap().len(), 1);
    assert_eq!(session.get_state().await.moves, vec!["e2e4"]);
}

#[tokio::test]
async fn saved_games_load_back_identically() {
    let original = session(EngineSpec::Random);
    original.set_mode(Mode::PlayerVsPlayer).await.unwrap();
    for (from, to) in [
        (Square::E2, Square::E4),
        (Square::C7, Square::C5),
        (Square::G1, Square::F3),
        (Square::D7, Square::D6),
    ] {
        play(&original, from, to).await;
    }
    let pgn = original.export_pgn().await;
    assert!(pgn.contains("[White \"Player\"]"));

    let copy = session(EngineSpec::Random);
    copy.import_pgn(&pgn).await.unwrap();
    let (a, b) = (original.get_state().await, copy.get_state().await);
    assert_eq!(a.moves, b.moves);
    assert_eq!(a.fen, b.fen);
}

#[tokio::test]
async fn fen_round_trips_through_set_position() {
    let session = session(EngineSpec::Random);
    let fen = "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3";
    session.set_position(fen).await.unwrap();
    assert_eq!(session.get_fen().await, fen);
    assert!(session.get_state().await.moves.is_empty());
}

#[tokio::test]
async fn rejected_fen_leaves_the_game_alone() {
    let session = session(EngineSpec::Random);
    play(&session, Square::E2, Square::E4).await;
    let before = session.get_state().await;

    assert!(matches!(
        session.set_position("rnbqkbnr/pppppppp/8/8 w").await,
        Err(SessionError::InvalidFen(_))
    ));
    assert_eq!(session.get_state().await, before);
}

#[tokio::test]
async fn corrupt_game_file_leaves_the_game_alone() {
    let session = session(EngineSpec::Random);
    play(&session, Square::E2, Square::E4).await;
    let before = session.get_state().await;

    let result = session.import_pgn("d2d4\nd7d5\nc2c4\ne7e6\nc4c6\n").await;
    assert_eq!(
        result,
        Err(SessionError::CorruptGameFile(
            "move 5 (c4c6) is illegal or unreadable".to_string()
        ))
    );
    assert_eq!(session.get_state().await, before);
}

#[tokio::test]
async fn unreachable_engine_reports_unavailable_and_keeps_the_mode() {
    let session = session(EngineSpec::Uci(EngineCommand {
        path: PathBuf::from("/nonexistent/stockfish"),
        args: Vec::new(),
    }));
    play(&session, Square::E2, Square::E4).await;

    let task = session.request_engine_move().await.unwrap();
    assert!(matches!(
        task.wait().await,
        Err(SessionError::EngineUnavailable(_))
    ));

    let state = session.get_state().await;
    assert!(matches!(
        state.engine_task,
        EngineTaskStatus::Failed {
            error: SessionError::EngineUnavailable(_)
        }
    ));
    assert_eq!(state.mode, Mode::PlayerVsEngine);
    assert_eq!(state.engine.status, EngineHealth::Offline);
    assert_eq!(state.moves, vec!["e2e4"]);
    assert_eq!(session.get_state().await.engine_task, EngineTaskStatus::Idle);

    // human play carries on without the engine
    session.set_mode(Mode::PlayerVsPlayer).await.unwrap();
    play(&session, Square::E7, Square::E5).await;
}

#[tokio::test]
async fn engine_timeout_is_reported_and_the_game_goes_on() {
    let session = session_with(SessionSettings {
        grace: Duration::from_millis(200),
        ..settings(fake_engine("silent"))
    });
    play(&session, Square::E2, Square::E4).await;

    let result = session.request_engine_move().await.unwrap().wait().await;
    assert_eq!(result.unwrap_err(), SessionError::EngineTimeout);
    assert_eq!(session.get_state().await.moves, vec!["e2e4"]);
    // the position is usable again
    session.set_mode(Mode::PlayerVsPlayer).await.unwrap();
    play(&session, Square::E7, Square::E5).await;
    session.shutdown().await;
}

#[tokio::test]
async fn engine_suggestions_are_checked_for_legality() {
    let session = session(fake_engine("illegal"));
    play(&session, Square::E2, Square::E4).await;
    let result = session.request_engine_move().await.unwrap().wait().await;
    assert!(matches!(result, Err(SessionError::IllegalMove(_))));
    assert_eq!(session.get_state().await.moves, vec!["e2e4"]);
    session.shutdown().await;
}

#[tokio::test]
async fn mode_decides_who_may_move() {
    let session = session(EngineSpec::Random);
    // the engine does not move for the player
    assert!(matches!(
        session.request_engine_move().await,
        Err(SessionError::InvalidState(_))
    ));
    play(&session, Square::E2, Square::E4).await;
    // and the player does not move for the engine
    assert!(matches!(
        session.apply_move(Square::E7, Square::E5, None).await,
        Err(SessionError::IllegalMove(_))
    ));

    session.set_mode(Mode::PlayerVsPlayer).await.unwrap();
    assert!(matches!(
        session.request_engine_move().await,
        Err(SessionError::InvalidState(_))
    ));

    session.set_mode(Mode::EngineVsEngine).await.unwrap();
    assert!(matches!(
        session.apply_move(Square::E7, Square::E5, None).await,
        Err(SessionError::IllegalMove(_))
    ));
    session.request_engine_move().await.unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn finished_games_accept_no_more_moves() {
    let session = session(EngineSpec::Random);
    session.set_mode(Mode::PlayerVsPlayer).await.unwrap();
    for (from, to) in [
        (Square::F2, Square::F3),
        (Square::E7, Square::E5),
        (Square::G2, Square::G4),
        (Square::D8, Square::H4),
    ] {
        play(&session, from, to).await;
    }
    let state = session.get_state().await;
    assert!(state.game_over);
    assert_eq!(state.result.unwrap().token, "0-1");

    assert!(matches!(
        session.apply_move(Square::A2, Square::A3, None).await,
        Err(SessionError::InvalidState(_))
    ));
    session.set_mode(Mode::EngineVsEngine).await.unwrap();
    assert!(matches!(
        session.start_battle().await,
        Err(SessionError::InvalidState(_))
    ));
}

#[tokio::test]
async fn clicking_squares_selects_and_moves() {
    let session = session(EngineSpec::Random);

    let selected = session.select_square(Square::G1).await.unwrap();
    assert_eq!(
        selected,
        SelectOutcome::Selected {
            square: Some("g1".to_string())
        }
    );
    let state = session.get_state().await;
    assert_eq!(state.selected_square.as_deref(), Some("g1"));
    assert_eq!(state.highlights, vec!["f3", "h3"]);

    // a square the knight cannot reach just clears the selection
    session.select_square(Square::E5).await.unwrap();
    assert_eq!(session.get_state().await.selected_square, None);

    session.select_square(Square::G1).await.unwrap();
    let moved = session.select_square(Square::F3).await.unwrap();
    assert!(matches!(moved, SelectOutcome::Moved { ref outcome } if outcome.played == "g1f3"));

    let state = session.get_state().await;
    assert_eq!(state.selected_square, None);
    assert!(state.highlights.is_empty());
    let last = state.last_move.unwrap();
    assert_eq!((last.from.as_str(), last.to.as_str()), ("g1", "f3"));

    // the engine's side cannot be picked up
    assert_eq!(
        session.select_square(Square::B8).await,
        Err(SessionError::InvalidSelection)
    );
}

#[tokio::test]
async fn engine_settings_are_clamped() {
    let session = session(EngineSpec::Random);
    let config = session.set_engine_config(Some(40), Some(0.0)).await.unwrap();
    assert_eq!(config.skill_level(), 20);
    assert_eq!(config.think_time_secs(), 0.1);

    let state = session.get_state().await;
    assert_eq!(state.engine.skill_level, 20);
    assert_eq!(state.engine.time_limit, 0.1);
}

#[tokio::test]
async fn stopped_battles_make_no_further_moves() {
    let session = session(EngineSpec::Random);
    session.set_mode(Mode::EngineVsEngine).await.unwrap();
    session.start_battle().await.unwrap();
    assert_eq!(
        session.start_battle().await,
        Err(SessionError::invalid_state("a battle is already running"))
    );
    assert_eq!(session.new_game().await, Err(SessionError::Busy));

    tokio::time::sleep(Duration::from_millis(60)).await;
    session.stop_battle().await;
    let stopped = wait_for_battle_end(&session).await;
    assert!(matches!(
        stopped.battle.last_end,
        Some(BattleEnd::Cancelled) | Some(BattleEnd::GameOver { .. })
    ));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(session.get_state().await.moves, stopped.moves);
    // stopping again is harmless
    session.stop_battle().await;
}

/// Stops a battle after `delay` and returns the move counts at the stop
/// signal and once the battle has ended.
async fn stop_battle_after(delay: Duration) -> (usize, usize) {
    let session = session(EngineSpec::Random);
    session.set_mode(Mode::EngineVsEngine).await.unwrap();
    session.start_battle().await.unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let at_stop = session.get_state().await.moves.len();
    session.stop_battle().await;
    let ended = wait_for_battle_end(&session).await;
    (at_stop, ended.moves.len())
}

#[tokio::test]
async fn battle_stopped_right_away_plays_at_most_one_move() {
    let (at_stop, at_end) = stop_battle_after(Duration::ZERO).await;
    assert_eq!(at_stop, 0);
    assert!(at_end <= 1, "{at_end} moves after an immediate stop");
}

#[tokio::test]
async fn battle_stopped_midway_plays_at_most_one_more_move() {
    let (at_stop, at_end) = stop_battle_after(Duration::from_millis(40)).await;
    assert!(at_end >= at_stop);
    assert!(
        at_end <= at_stop + 1,
        "{at_stop} moves at the stop, {at_end} at the end"
    );
}

#[tokio::test]
async fn battles_stop_at_the_ply_limit() {
    let session = session_with(SessionSettings {
        battle: BattleSettings {
            pace: Duration::from_millis(1),
            max_retries: 2,
            max_plies: 6,
        },
        ..settings(EngineSpec::Random)
    });
    session.set_mode(Mode::EngineVsEngine).await.unwrap();
    session.start_battle().await.unwrap();

    let state = wait_for_battle_end(&session).await;
    assert!(state.moves.len() <= 6);
    match state.battle.last_end {
        Some(BattleEnd::PlyLimit { plies }) => assert_eq!(plies, 6),
        Some(BattleEnd::GameOver { .. }) => assert!(state.game_over),
        other => panic!("unexpected battle end {other:?}"),
    }
}

#[tokio::test]
async fn failing_engine_ends_the_battle() {
    let session = session(fake_engine("crash"));
    session.set_mode(Mode::EngineVsEngine).await.unwrap();
    session.start_battle().await.unwrap();

    let state = wait_for_battle_end(&session).await;
    assert_eq!(
        state.battle.last_end,
        Some(BattleEnd::Failed {
            error: SessionError::BattleFailed(3)
        })
    );
    assert!(state.moves.is_empty());
    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_abandons_the_engine_move_and_closes_the_session() {
    let log = launch_log("shutdown-before-start");
    let session = session(counted_fake_engine("slow", &log));
    play(&session, Square::E2, Square::E4).await;
    let task = session.request_engine_move().await.unwrap();

    session.shutdown().await;
    assert_eq!(task.wait().await, Err(SessionError::EngineStopped));
    assert!(matches!(
        session.new_game().await,
        Err(SessionError::InvalidState(_))
    ));
    assert_eq!(session.get_state().await.moves, vec!["e2e4"]);

    // the worker had not launched the engine yet, and must not after closing
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launches(&log), 0);
    let _ = std::fs::remove_file(&log);
}

#[tokio::test]
async fn shutdown_during_a_search_fails_it_as_stopped() {
    let log = launch_log("shutdown-mid-search");
    let session = session(counted_fake_engine("silent", &log));
    play(&session, Square::E2, Square::E4).await;
    let task = session.request_engine_move().await.unwrap();

    for _ in 0..200 {
        if launches(&log) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(launches(&log), 1);

    session.shutdown().await;
    let stopped = tokio::time::timeout(Duration::from_secs(1), task.wait())
        .await
        .unwrap();
    assert_eq!(stopped, Err(SessionError::EngineStopped));
    assert_eq!(launches(&log), 1);
    let _ = std::fs::remove_file(&log);
}
