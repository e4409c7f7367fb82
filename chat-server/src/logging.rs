//! Structured logging setup, mirroring the corpus's pattern of a text
//! layer for an attached terminal and a JSON layer otherwise — both
//! driven by the same `EnvFilter`, either from `RUST_LOG` or from `-v`.

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{Cli, LogFormat};

pub fn init_logging(cli: &Cli) -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        let level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var(
            "RUST_LOG",
            format!("chat_server={level},chat_core={level},chat_db={level},chat_common={level}"),
        );
    }

    let env_filter = EnvFilter::from_default_env();
    let use_json = match cli.log_format {
        Some(LogFormat::Json) => true,
        Some(LogFormat::Text) => false,
        None => !console::user_attended(),
    };

    let registry = tracing_subscriber::registry();

    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_filter(env_filter))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_filter(env_filter),
            )
            .try_init()
    }
    .context("failed to install tracing subscriber")
}
