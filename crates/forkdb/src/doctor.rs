// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `forkdb doctor` command implementation.
//!
//! Runs the engine in-process and through a forked worker, and reports what
//! the configuration will give each worker.

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use forkdb::{ForkDb, ForkDbError, ForkdbConfig, Value};

/// Worker id used for the round-trip check.
const PING_WORKER: u32 = u32::MAX;

const PING_PATH: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: String, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration: start.elapsed(),
        }
    }
}

/// Run the `forkdb doctor` command. With `plain`, disables colored output.
pub fn run_doctor(config: &ForkdbConfig, plain: bool) -> Result<(), ForkDbError> {
    let use_color = !plain && std::io::stdout().is_terminal();

    let mut ping_config = config.clone();
    ping_config.worker.fork_all = false;
    let forkdb = ForkDb::sqlite(ping_config)?;

    let results = vec![
        check_buffers(config),
        check_in_process(&forkdb),
        check_worker(&forkdb),
    ];
    forkdb.shutdown();

    println!();
    println!("  forkdb doctor");
    println!("  {}", "-".repeat(50));

    let mut issues = 0;
    for result in &results {
        if result.status != CheckStatus::Pass {
            issues += 1;
        }
        println!("{}", render(result, use_color));
    }
    println!();

    if issues > 0 {
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
    } else {
        println!("  All checks passed.");
    }
    println!();

    Ok(())
}

fn render(result: &CheckResult, use_color: bool) -> String {
    use colored::Colorize;

    let duration_ms = result.duration.as_millis();
    let (symbol, message) = match (&result.status, use_color) {
        (CheckStatus::Pass, true) => ("✓".green().to_string(), result.message.clone()),
        (CheckStatus::Warn, true) => ("!".yellow().to_string(), result.message.yellow().to_string()),
        (CheckStatus::Fail, true) => ("✗".red().to_string(), result.message.red().to_string()),
        (CheckStatus::Pass, false) => ("[OK]  ".to_string(), result.message.clone()),
        (CheckStatus::Warn, false) => ("[WARN]".to_string(), result.message.clone()),
        (CheckStatus::Fail, false) => ("[FAIL]".to_string(), result.message.clone()),
    };
    format!(
        "    {symbol} {:<20} {message} ({duration_ms}ms)",
        result.name
    )
}

/// Reports the per-worker buffer sizes and the cache capacity.
fn check_buffers(config: &ForkdbConfig) -> CheckResult {
    let start = Instant::now();
    let message = format!(
        "{} handle slots, {} KiB shared buffer, {} B error buffer",
        config.cache.capacity,
        config.worker.shared_buffer_bytes / 1024,
        config.worker.error_buffer_bytes
    );
    let status = if config.worker.request_timeout_ms == 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Warn
    };
    let message = if status == CheckStatus::Warn {
        format!(
            "{message}; requests time out after {}ms",
            config.worker.request_timeout_ms
        )
    } else {
        message
    };
    CheckResult::new("Configuration", status, message, start)
}

fn check_in_process<E: forkdb::Engine>(forkdb: &ForkDb<E>) -> CheckResult {
    let start = Instant::now();
    let worker = forkdb.config().worker.in_process_worker;
    match ping(forkdb, worker) {
        Ok(()) => CheckResult::new("In-process engine", CheckStatus::Pass, "ok".to_string(), start),
        Err(err) => CheckResult::new("In-process engine", CheckStatus::Fail, err.to_string(), start),
    }
}

fn check_worker<E: forkdb::Engine>(forkdb: &ForkDb<E>) -> CheckResult {
    let start = Instant::now();
    match ping(forkdb, PING_WORKER) {
        Ok(()) => {
            let pid = forkdb
                .worker_pid(PING_WORKER)
                .map_or_else(|| "unknown".to_string(), |p| p.to_string());
            CheckResult::new(
                "Worker process",
                CheckStatus::Pass,
                format!("answered from pid {pid}"),
                start,
            )
        }
        Err(err) => CheckResult::new("Worker process", CheckStatus::Fail, err.to_string(), start),
    }
}

fn ping<E: forkdb::Engine>(forkdb: &ForkDb<E>, worker: u32) -> Result<(), ForkDbError> {
    let row = forkdb.database(PING_PATH).eval(worker, "1 as ping")?;
    match row.as_ref().and_then(|r| r.get("ping")) {
        Some(Value::Integer(1)) => Ok(()),
        other => Err(ForkDbError::Internal(format!("unexpected ping reply: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_rendering_has_no_escape_codes() {
        let result = CheckResult {
            name: "Worker process".to_string(),
            status: CheckStatus::Fail,
            message: "spawn failed".to_string(),
            duration: Duration::from_millis(3),
        };
        let line = render(&result, false);
        assert!(line.contains("[FAIL]"));
        assert!(line.contains("spawn failed (3ms)"));
        assert!(!line.contains('\u{1b}'));
    }

    #[test]
    fn request_timeout_is_flagged() {
        let mut config = ForkdbConfig::default();
        config.worker.request_timeout_ms = 500;
        assert_eq!(check_buffers(&config).status, CheckStatus::Warn);
        assert_eq!(check_buffers(&ForkdbConfig::default()).status, CheckStatus::Pass);
    }
}
