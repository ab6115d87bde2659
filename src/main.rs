// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tee_oracle_core::api::handle_raw;
use tee_oracle_core::config::EnclaveConfig;
use tee_oracle_core::logging::init_tracing;
use tee_oracle_core::state::Enclave;

#[tokio::main]
async fn main() {
    let config = match EnclaveConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let enclave = match Enclave::build(&config) {
        Ok(enclave) => Arc::new(enclave),
        Err(e) => {
            error!(error = %e, "Failed to initialize enclave");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let flusher = enclave
        .auto_flusher()
        .map(|flusher| tokio::spawn(flusher.run(shutdown.clone())));

    info!(
        provider = %config.storage.provider,
        path = %config.storage.storage_path.display(),
        "Enclave ready, serving requests on stdin"
    );

    tokio::select! {
        _ = serve(Arc::clone(&enclave)) => info!("Input closed"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    shutdown.cancel();
    if let Some(handle) = flusher {
        if let Err(e) = handle.await {
            warn!(error = %e, "Auto-flush task ended abnormally");
        }
    }

    let final_flush = tokio::task::spawn_blocking(move || enclave.shutdown()).await;
    match final_flush {
        Ok(Ok(())) => info!("Enclave stopped"),
        Ok(Err(e)) => error!(error = %e, "Final flush failed"),
        Err(e) => error!(error = %e, "Final flush task panicked"),
    }
}

/// One JSON request per stdin line, one JSON response per stdout line.
async fn serve(enclave: Arc<Enclave>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "Failed to read request");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let enclave = Arc::clone(&enclave);
        let response = match tokio::task::spawn_blocking(move || handle_raw(&enclave, &line)).await
        {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Request task failed");
                r#"{"status":"error","code":"internal_error","message":"Internal enclave error"}"#
                    .to_string()
            }
        };

        let written = async {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            error!(error = %e, "Failed to write response");
            return;
        }
    }
}
