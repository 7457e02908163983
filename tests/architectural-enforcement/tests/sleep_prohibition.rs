//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Relay production code never blocks a thread on a sleep, and
//! never sleeps as a substitute for waiting on I/O.
//! **Exceptions**: the reconnect backoff timer (`tokio::time::sleep` next to
//! the backoff computation), test code.

use std::path::Path;

use architectural_enforcement::{context_mentions, scan};

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan(|_, lines, idx| lines[idx].1.contains("thread::sleep"));

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} blocking sleep(s) in production code. Use tokio timers.",
            violations.len()
        );
    }
}

#[test]
fn test_async_sleep_only_for_backoff() {
    let violations = scan(|path: &Path, lines, idx| {
        let code = lines[idx].1;
        if !(code.contains("::sleep(") || code.contains(".sleep(")) || code.contains("thread::sleep") {
            return false;
        }

        let in_connection = path.ends_with("connection/stream.rs");
        let is_backoff = context_mentions(lines, idx, 15, &["backoff", "reconnect", "attempt"]);
        !(in_connection && is_backoff)
    });

    if !violations.is_empty() {
        eprintln!("\n✅ ACCEPTABLE: the reconnect backoff timer in connection/stream.rs");
        eprintln!("❌ FORBIDDEN: sleeping to wait for events, polling loops\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!("\nFound {} sleep violation(s) in production code.", violations.len());
    }
}
