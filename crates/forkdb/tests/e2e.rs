// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios against SQLite, in-process and through forked workers.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use forkdb::{ErrorKind, ForkDb, ForkDbError, ForkdbConfig, QueryOptions, Value};
use forkdb_sqlite::SqliteEngine;
use forkdb_test_utils::{FIXTURE_COLUMNS, FIXTURE_ROWS, Fixture};
use serial_test::serial;
use tracing_test::traced_test;

fn fixture() -> Fixture {
    Fixture::new().expect("fixture")
}

fn forkdb(config: ForkdbConfig) -> ForkDb<SqliteEngine> {
    ForkDb::sqlite(config).expect("forkdb")
}

fn all_rows() -> QueryOptions {
    QueryOptions::default().with_max_rows(1000)
}

/// Counts forever; only a cancel or a timeout ends it.
const RUNAWAY: &str = "with recursive n(i) as (select 1 union all select i + 1 from n) \
                       select count(*) from n";

/// Cancels `worker` until the runner reports it is done.
fn cancel_until_done(db: &ForkDb<SqliteEngine>, worker: u32, done: &mpsc::Receiver<()>) {
    loop {
        assert!(db.cancel(worker).expect("cancel"));
        if done.recv_timeout(Duration::from_millis(100)).is_ok() {
            break;
        }
    }
}

#[test]
#[serial]
fn in_process_worker_reads_the_fixture() {
    let fixture = fixture();
    let db = forkdb(ForkdbConfig::default());
    let result = db
        .database(fixture.path_str())
        .exec(0, "select * from T", &[], &all_rows().with_counts())
        .expect("exec");

    assert_eq!(result.row_count, FIXTURE_ROWS);
    assert_eq!(result.columns, FIXTURE_COLUMNS);
    assert_eq!(result.rows[1].get("name"), Some(&Value::from("row-2")));
    assert_eq!(result.rows[1].get("score"), Some(&Value::Real(3.0)));
    assert_eq!(result.rows[1].get("payload"), Some(&Value::Blob(vec![0, 1])));
    assert!(result.rows[FIXTURE_ROWS - 1][3].is_null());
    assert_eq!(
        result.counts.map(|c| c.rows_returned_max),
        Some(FIXTURE_ROWS as i64)
    );
    // Nothing was forked for worker 0.
    assert_eq!(db.cache().supervisor().child_pid(0), None);
}

#[test]
#[serial]
fn forked_worker_reads_the_fixture() {
    let fixture = fixture();
    let db = forkdb(ForkdbConfig::default());
    let result = db
        .database(fixture.path_str())
        .exec(1, "select * from T where id > ?", &[Value::from(2)], &all_rows())
        .expect("exec");

    assert_eq!(result.row_count, FIXTURE_ROWS - 2);
    assert_eq!(result.rows[0].get("id"), Some(&Value::Integer(3)));
    let pid = db.worker_pid(1).expect("worker spawned");
    assert_ne!(i64::from(pid), i64::from(std::process::id()));
}

#[test]
#[serial]
fn concurrent_workers_do_not_cross_talk() {
    let fixture = fixture();
    let db = forkdb(ForkdbConfig::default());
    let path = fixture.path_str();

    let pids: Vec<libc::pid_t> = thread::scope(|scope| {
        let handles: Vec<_> = [1u32, 2]
            .into_iter()
            .map(|worker| {
                let db = &db;
                let path = path.clone();
                scope.spawn(move || {
                    let database = db.database(path);
                    for i in 0..50i64 {
                        let tag = format!("w{worker}-{i}");
                        let params = [Value::from(tag.as_str()), Value::from(i)];
                        let row = database
                            .one(worker, "select ? as tag, ? as n", &params)
                            .expect("query")
                            .expect("row");
                        assert_eq!(row.get("tag").and_then(Value::as_str), Some(tag.as_str()));
                        assert_eq!(row.get("n").and_then(Value::as_i64), Some(i));
                    }
                    db.worker_pid(worker).expect("worker spawned")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect()
    });

    assert_ne!(pids[0], pids[1]);
}

#[test]
#[serial]
fn rows_larger_than_the_shared_buffer_arrive_intact() {
    let fixture = fixture();
    let mut config = ForkdbConfig::default();
    config.worker.shared_buffer_bytes = 1024;
    let db = forkdb(config);

    let size = 3 * 1024 + 17;
    let row = db
        .database(fixture.path_str())
        .one(1, "select zeroblob(?) as big, 'tail' as t", &[Value::from(size as i64)])
        .expect("query")
        .expect("row");
    let big = row.get("big").and_then(Value::as_bytes).expect("blob");
    assert_eq!(big.len(), size);
    assert!(big.iter().all(|b| *b == 0));
    assert_eq!(row.get("t").and_then(Value::as_str), Some("tail"));
}

#[test]
#[serial]
#[traced_test]
fn respawn_after_kill_is_transparent() {
    let fixture = fixture();
    let db = forkdb(ForkdbConfig::default());
    let database = db.database(fixture.path_str());
    database.one(1, "select 1", &[]).expect("query");
    let first = db.worker_pid(1).expect("worker spawned");

    // SAFETY: `first` is a child of this process.
    unsafe { libc::kill(first, libc::SIGKILL) };

    let count = || database.eval(1, "count(*) as n from T");
    let row = match count() {
        Ok(row) => row,
        Err(err) => {
            assert!(err.is_retryable(), "unexpected error: {err}");
            count().expect("respawned")
        }
    };
    assert_eq!(
        row.and_then(|r| r.get("n").and_then(Value::as_i64)),
        Some(FIXTURE_ROWS as i64)
    );
    assert_ne!(db.worker_pid(1), Some(first));
    assert!(logs_contain("worker process lost; respawning"));
}

#[test]
#[serial]
fn cancel_stops_a_runaway_statement() {
    let fixture = fixture();
    let mut config = ForkdbConfig::default();
    // Fails the test instead of hanging it if the cancel is lost.
    config.worker.request_timeout_ms = 20_000;
    let db = forkdb(config);
    let path = fixture.sibling("b.db");

    let (done_tx, done_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let db = &db;
        let runner = scope.spawn(move || {
            let database = db.database(path);
            database.one(1, "select 1", &[]).expect("warm up");
            let err = database.one(1, RUNAWAY, &[]).expect_err("cancelled");
            done_tx.send(()).expect("send");
            resume_rx.recv().expect("resume");
            let after = database.eval(1, "42 as answer").expect("query after cancel");
            (err, after)
        });

        while db.worker_pid(1).is_none() {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(200));
        cancel_until_done(db, 1, &done_rx);
        resume_tx.send(()).expect("send");

        let (err, after) = runner.join().expect("join");
        assert_eq!(err.kind(), ErrorKind::Cancelled, "{err}");
        assert_eq!(
            after.and_then(|r| r.get("answer").and_then(Value::as_i64)),
            Some(42)
        );
    });
}

#[test]
#[serial]
fn cancel_between_fetches_stops_the_statement() {
    let fixture = fixture();
    let db = forkdb(ForkdbConfig::default());
    let path = fixture.path_str();

    for worker in [0, 1] {
        {
            let mut handle = db.cache().acquire(&path, worker).expect("acquire");
            handle.prepare("select * from T").expect("prepare");
            handle.execute().expect("execute");
            assert!(handle.fetch().expect("first row").is_some());

            assert!(db.cancel(worker).expect("cancel"));
            let err = handle.fetch().expect_err("cancelled");
            assert_eq!(err.kind(), ErrorKind::Cancelled, "worker {worker}: {err}");
        }
        // The handle recovers on its next use.
        let row = db
            .database(path.as_str())
            .eval(worker, "count(*) as n from T")
            .expect("query after cancel");
        assert_eq!(
            row.and_then(|r| r.get("n").and_then(Value::as_i64)),
            Some(FIXTURE_ROWS as i64)
        );
    }
}

#[test]
#[serial]
fn eviction_does_not_wait_for_a_busy_worker() {
    let fixture = fixture();
    let mut config = ForkdbConfig::default();
    config.cache.capacity = 2;
    config.worker.request_timeout_ms = 20_000;
    let db = forkdb(config);
    let idle_path = fixture.sibling("a.db");
    let busy_path = fixture.sibling("b.db");

    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    thread::scope(|scope| {
        let db = &db;
        let runner = scope.spawn(move || {
            db.database(idle_path)
                .one(2, "select 1", &[])
                .expect("idle handle");
            let busy = db.database(busy_path);
            busy.one(2, "select 1", &[]).expect("warm up");
            started_tx.send(()).expect("send");
            let err = busy.one(2, RUNAWAY, &[]).expect_err("cancelled");
            done_tx.send(()).expect("send");
            let after = busy.eval(2, "7 as n").expect("query after cancel");
            (err, after)
        });

        started_rx.recv().expect("started");
        thread::sleep(Duration::from_millis(200));

        // The only idle slot belongs to worker 2, which is mid-statement.
        let start = Instant::now();
        let row = db
            .database(fixture.path_str())
            .eval(1, "count(*) as n from T")
            .expect("query");
        let elapsed = start.elapsed();
        assert_eq!(
            row.and_then(|r| r.get("n").and_then(Value::as_i64)),
            Some(FIXTURE_ROWS as i64)
        );
        assert!(done_rx.try_recv().is_err(), "eviction waited for worker 2");
        assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");

        cancel_until_done(db, 2, &done_rx);
        let (err, after) = runner.join().expect("join");
        assert_eq!(err.kind(), ErrorKind::Cancelled, "{err}");
        assert_eq!(after.and_then(|r| r.get("n").and_then(Value::as_i64)), Some(7));
    });
}

#[test]
#[serial]
fn cache_exhaustion_is_reported() {
    let fixture = fixture();
    let mut config = ForkdbConfig::default();
    config.cache.capacity = 2;
    let db = forkdb(config);

    let _a = db.cache().acquire(&fixture.sibling("a.db"), 0).expect("a");
    let _b = db.cache().acquire(&fixture.sibling("b.db"), 0).expect("b");
    let err = db
        .database(fixture.path_str())
        .exec(0, "select * from T", &[], &QueryOptions::default())
        .expect_err("exhausted");
    assert!(matches!(err, ForkDbError::CacheExhausted { capacity: 2 }));
    assert_eq!(db.cache().in_use(), 2);
}

#[test]
#[serial]
fn settings_follow_set_and_reset() {
    let fixture = fixture();
    let mut config = ForkdbConfig::default();
    config
        .engine
        .defaults
        .insert("cache_size".to_string(), "500".to_string());
    let db = forkdb(config);
    let mut database = db.database(fixture.path_str());

    let cache_size = |database: &forkdb::Database<SqliteEngine>| {
        database
            .eval(1, "* from pragma_cache_size")
            .expect("query")
            .and_then(|r| r[0].as_i64())
    };
    assert_eq!(cache_size(&database), Some(500));

    let reported = database.set(1, "CACHE_SIZE", "1234").expect("set");
    assert_eq!(reported.as_deref(), Some("1234"));
    assert_eq!(cache_size(&database), Some(1234));

    database.reset(1).expect("reset");
    assert_eq!(cache_size(&database), Some(500));

    assert_eq!(
        database.set(1, "cache_size = 1; --", "1").map_err(|e| e.kind()),
        Err(ErrorKind::Engine)
    );
}

#[test]
#[serial]
fn engine_errors_reach_the_caller() {
    let fixture = fixture();
    let db = forkdb(ForkdbConfig::default());
    let database = db.database(fixture.path_str());
    for worker in [0, 1] {
        let err = database
            .exec(worker, "select * from missing", &[], &QueryOptions::default())
            .expect_err("no such table");
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(err.to_string().contains("no such table"), "{err}");
        // The same handle serves the next statement.
        assert!(database.one(worker, "select 1", &[]).expect("query").is_some());
    }
}
