use std::{path::PathBuf, sync::Arc, time::Duration};

use rusty_chess_arena::engine::{
    EngineAdapter, EngineCommand, EngineError, EngineOptions, EngineSpec, SearchRequest,
    uci_protocol::STARTPOS_FEN,
};
use shakmaty::{Chess, uci::UciMove};

fn fake_engine(mode: &str) -> EngineSpec {
    EngineSpec::Uci(EngineCommand {
        path: PathBuf::from("/bin/sh"),
        args: vec![
            concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_uci.sh").to_string(),
            mode.to_string(),
        ],
    })
}

fn adapter(mode: &str) -> EngineAdapter {
    EngineAdapter::new(
        "uci-test",
        fake_engine(mode),
        EngineOptions {
            skill_level: 5,
            hash_mb: 16,
            threads: 1,
        },
        Duration::from_millis(500),
        Duration::from_millis(300),
    )
}

fn search(moves: &[&str]) -> SearchRequest {
    SearchRequest {
        start_fen: STARTPOS_FEN.to_string(),
        moves: moves.iter().map(|m| m.to_string()).collect(),
        position: Chess::new(),
        think_time: Duration::from_millis(100),
    }
}

fn uci(text: &str) -> UciMove {
    text.parse().unwrap()
}

#[tokio::test]
async fn plays_the_moves_the_engine_reports() {
    let engine = adapter("ok");
    engine.start().await.unwrap();
    assert_eq!(engine.best_move(&search(&[])).await.unwrap(), uci("e2e4"));
    assert_eq!(
        engine.best_move(&search(&["e2e4"])).await.unwrap(),
        uci("e7e5")
    );
    engine.stop().await;
}

#[tokio::test]
async fn start_is_idempotent() {
    let engine = adapter("ok");
    engine.start().await.unwrap();
    engine.start().await.unwrap();
    assert!(engine.best_move(&search(&[])).await.is_ok());
    engine.stop().await;
}

#[tokio::test]
async fn silent_engine_times_out_and_is_discarded() {
    let engine = adapter("silent");
    engine.start().await.unwrap();
    assert_eq!(
        engine.best_move(&search(&[])).await,
        Err(EngineError::Timeout)
    );
    // the process is gone until the next start
    assert!(matches!(
        engine.best_move(&search(&[])).await,
        Err(EngineError::Unavailable(_))
    ));
    engine.start().await.unwrap();
    engine.stop().await;
}

#[tokio::test]
async fn crashing_engine_is_reported() {
    let engine = adapter("crash");
    engine.start().await.unwrap();
    assert!(matches!(
        engine.best_move(&search(&[])).await,
        Err(EngineError::Crashed(_))
    ));
}

#[tokio::test]
async fn missing_handshake_means_unavailable() {
    let engine = adapter("mute");
    assert!(matches!(
        engine.start().await,
        Err(EngineError::Unavailable(_))
    ));
}

#[tokio::test]
async fn stop_interrupts_a_running_search() {
    let engine = Arc::new(adapter("silent"));
    engine.start().await.unwrap();

    let mut long = search(&[]);
    long.think_time = Duration::from_secs(10);
    let searching = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.best_move(&long).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(3), searching)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(EngineError::Stopped));
}
