//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async relay code MUST NOT use blocking I/O.
//! **Exception**: non-async functions such as config loading, which run
//! before the host starts relaying.

use architectural_enforcement::{production_lines, report};

const BLOCKING_PATTERNS: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::thread::sleep",
    "reqwest::blocking",
    "std::process::Command",
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| !line.in_sync_fn)
        .filter(|line| BLOCKING_PATTERNS.iter().any(|p| line.code.contains(p)))
        .collect();

    report(
        "Blocking I/O",
        &violations,
        &[
            "✅ Use reqwest's async client and tokio::fs inside async code.",
            "✅ Blocking reads are fine in non-async setup such as load_config.",
        ],
    );
}

#[test]
fn test_no_blocking_http_client_anywhere() {
    let violations: Vec<_> = production_lines()
        .into_iter()
        .filter(|line| line.code.contains("reqwest::blocking"))
        .collect();

    report(
        "Blocking HTTP client",
        &violations,
        &["✅ The Ollama backend streams with reqwest's async client."],
    );
}
