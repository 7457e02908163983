//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Relay production code does all network I/O asynchronously.
//! **Exception**: reading the TOML config file in `config.rs`, which happens
//! before any stream is opened.

use architectural_enforcement::scan;

const FORBIDDEN: &[&str] = &[
    "reqwest::blocking",
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::process::Command",
    "block_on(",
];

#[test]
fn test_no_blocking_network_io() {
    let violations = scan(|_, lines, idx| {
        let code = lines[idx].1;
        FORBIDDEN.iter().any(|pattern| code.contains(pattern))
    });

    if !violations.is_empty() {
        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - reqwest::blocking::*, std::net sockets, std::process::Command");
        eprintln!("  - block_on() inside the runtime");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_file_io_only_in_config() {
    let violations = scan(|path, lines, idx| {
        lines[idx].1.contains("std::fs::") && !path.ends_with("src/config.rs")
    });

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} std::fs call(s) outside config loading.",
            violations.len()
        );
    }
}
