// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;

use visionkit_server::cli;

#[tokio::main]
async fn main() {
    let parsed = cli::Cli::parse();
    cli::handle_command(&parsed).await;
}
