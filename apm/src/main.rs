// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

mod cli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = cli::process().await {
        // operation failures already rendered their message
        if !matches!(err, cli::Error::Operation) {
            eprintln!("apm: {err}");
        }
        std::process::exit(1);
    }
}
