//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Relay production code MUST NOT call sleep methods. Progress
//! is driven by the backend stream, the session watch channel and
//! `tokio::time::timeout`; pacing in tests goes through the scripted
//! backend's gate.

use architectural_enforcement::{production_lines, report};

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| line.code.contains("::sleep(") || line.code.contains(".sleep("))
        .collect();

    report(
        "Sleep call",
        &violations,
        &[
            "✅ Wait on a channel, a watch value or tokio::time::timeout instead.",
            "❌ Sleep in polling loops or as poor man's synchronization.",
        ],
    );
}
