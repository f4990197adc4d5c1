use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::{Connection, SqliteConnection};
use tempfile::TempDir;
use trusty_poll::db::Database;
use trusty_poll::{PollEngine, PollError};

fn db_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("polls.db").display())
}

async fn file_engine(dir: &TempDir, max_connections: u32, lock_timeout: Duration) -> Arc<PollEngine> {
    let db = Database::new(&db_url(dir), max_connections, lock_timeout).await.unwrap();
    Arc::new(PollEngine::new(db, lock_timeout))
}

fn two_options() -> Vec<String> {
    vec!["Yes".to_string(), "No".to_string()]
}

/// Another process holding SQLite's write lock on the same file.
async fn hold_write_lock(dir: &TempDir) -> SqliteConnection {
    let mut conn = SqliteConnection::connect(&db_url(dir)).await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.unwrap();
    conn
}

async fn release_write_lock(mut conn: SqliteConnection) {
    sqlx::query("ROLLBACK").execute(&mut conn).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn foreign_write_lock_is_busy_within_the_lock_timeout() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, 4, Duration::from_millis(100)).await;
    let poll = engine.create_poll("Ship it?", &two_options(), true).await.unwrap();

    let blocker = hold_write_lock(&dir).await;
    let started = Instant::now();
    let result = engine.vote(&poll.id, "anon1", 0).await;
    assert!(matches!(result, Err(PollError::Busy)), "got {:?}", result);
    assert!(started.elapsed() < Duration::from_secs(2));
    release_write_lock(blocker).await;

    let poll = engine.vote(&poll.id, "anon1", 0).await.unwrap();
    assert_eq!(poll.options[0].votes, 1);
}

#[tokio::test]
async fn exhausted_pool_is_busy() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, 1, Duration::from_millis(250)).await;
    let poll = engine.create_poll("Ship it?", &two_options(), true).await.unwrap();

    let only_connection = engine.database().pool().acquire().await.unwrap();
    assert!(matches!(engine.get_poll(&poll.id).await, Err(PollError::Busy)));
    assert!(matches!(engine.vote(&poll.id, "anon1", 0).await, Err(PollError::Busy)));
    drop(only_connection);

    engine.vote(&poll.id, "anon1", 0).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_vote_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, 4, Duration::from_secs(30)).await;
    let poll = engine.create_poll("Ship it?", &two_options(), true).await.unwrap();

    let blocker = hold_write_lock(&dir).await;
    let pending = {
        let engine = Arc::clone(&engine);
        let poll_id = poll.id.clone();
        tokio::spawn(async move { engine.vote(&poll_id, "anon1", 0).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    release_write_lock(blocker).await;

    assert_eq!(engine.current_vote(&poll.id, "anon1").await.unwrap(), None);
    let after = engine.get_poll(&poll.id).await.unwrap();
    assert_eq!(after.total_votes(), 0);
    assert_eq!(after.updated_at, poll.updated_at);
    engine.verify_poll(&poll.id).await.unwrap();

    let poll = engine.vote(&poll.id, "anon1", 0).await.unwrap();
    assert_eq!(poll.options[0].votes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn votes_cut_off_at_any_point_are_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, 4, Duration::from_secs(30)).await;
    let poll = engine.create_poll("Ship it?", &two_options(), true).await.unwrap();

    const VOTERS: u64 = 40;
    for i in 0..VOTERS {
        let voter = format!("anon{}", i);
        let vote = engine.vote(&poll.id, &voter, (i % 2) as usize);
        let _ = tokio::time::timeout(Duration::from_micros(i * 100), vote).await;
    }

    // Any write still in flight holds the file lock, so this waits for it to settle.
    engine.create_poll("Settle?", &two_options(), true).await.unwrap();

    engine.verify_poll(&poll.id).await.unwrap();
    let mut recorded = Vec::new();
    for i in 0..VOTERS {
        let current = engine.current_vote(&poll.id, &format!("anon{}", i)).await.unwrap();
        if let Some(index) = current {
            assert_eq!(index, (i % 2) as usize);
        }
        recorded.push(current);
    }
    let landed = recorded.iter().filter(|vote| vote.is_some()).count() as u64;
    assert_eq!(engine.get_poll(&poll.id).await.unwrap().total_votes(), landed);

    for (i, current) in recorded.into_iter().enumerate() {
        let voter = format!("anon{}", i);
        let result = engine.vote(&poll.id, &voter, i % 2).await;
        match current {
            Some(_) => assert!(matches!(result, Err(PollError::AlreadyVoted))),
            None => assert!(result.is_ok(), "got {:?}", result),
        }
    }

    let poll = engine.get_poll(&poll.id).await.unwrap();
    assert_eq!(poll.total_votes(), VOTERS);
    engine.verify_poll(&poll.id).await.unwrap();
}
