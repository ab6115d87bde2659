// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tracing subscriber set-up.
//!
//! `RUST_LOG` takes precedence over the configured level. Logs go to stderr
//! because stdout carries the response stream.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{EnclaveConfig, LogFormat};

/// Filter for the given configuration, ignoring `RUST_LOG`.
pub fn configured_filter(config: &EnclaveConfig) -> EnvFilter {
    if !config.enable_logging {
        return EnvFilter::new("off");
    }
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(config: &EnclaveConfig) {
    let filter = if config.enable_logging {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| configured_filter(config))
    } else {
        configured_filter(config)
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
