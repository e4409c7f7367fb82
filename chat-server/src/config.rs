//! CLI surface: everything the server binary needs to start is passed on
//! the command line (or the matching environment variable) — there is no
//! config-file layer.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use chat_common::constants::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-user real-time text chat server", long_about = None)]
pub struct Cli {
    /// Address to bind the listener to.
    #[arg(long, default_value = DEFAULT_HOST, env = "CHAT_HOST")]
    pub host: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "CHAT_PORT")]
    pub port: u16,

    /// Path to the SQLite database file; created if absent.
    #[arg(long, default_value = "chat.db", env = "CHAT_DB")]
    pub db: PathBuf,

    /// Serve plaintext TCP instead of wrapping each connection in TLS.
    /// Development only — the wire protocol carries credentials in the
    /// clear without it.
    #[arg(long)]
    pub no_tls: bool,

    /// PEM certificate chain presented during the TLS handshake.
    /// Ignored when `--no-tls` is set.
    #[arg(long, default_value = "cert.pem")]
    pub cert: PathBuf,

    /// PEM private key matching `--cert`. Ignored when `--no-tls` is set.
    #[arg(long, default_value = "key.pem")]
    pub key: PathBuf,

    /// Raise log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log rendering: compact text for a terminal, or structured JSON
    /// for shipping to a log aggregator. Defaults to whichever suits
    /// whether stdout is attached to a terminal.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
