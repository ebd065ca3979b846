// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Command-line interface for the `vkit` binary.

use clap::{Parser, Subcommand};

use crate::{config, logging, server};

#[derive(Parser)]
#[command(name = "vkit", about = "VisionKit video analytics control plane", version)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "vkit.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control-plane server (the default).
    Serve,
    /// Print the default configuration as TOML and exit.
    GenerateConfig,
}

/// Dispatches the parsed command.
pub async fn handle_command(cli: &Cli) {
    match cli.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::GenerateConfig => match config::generate_default() {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("Failed to generate default config: {e}");
                std::process::exit(1);
            },
        },
        Commands::Serve => {
            let load_result = match config::load(&cli.config) {
                Ok(result) => result,
                Err(e) => {
                    eprintln!("Failed to load config from {}: {e}", cli.config);
                    std::process::exit(1);
                },
            };

            let _log_guard = match logging::init_logging(&load_result.config.log) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("Failed to initialize logging: {e}");
                    std::process::exit(1);
                },
            };

            if let Some(path) = &load_result.file_missing {
                tracing::info!(path = %path, "Config file not found, using defaults");
            }

            if let Err(e) = server::run(load_result.config).await {
                tracing::error!(error = %e, "Server exited with error");
                std::process::exit(1);
            }
        },
    }
}
