// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::Parser;
use colored::*;
use rsmuggle::cli::{self, Cli};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(e) = SimpleLogger::new().with_level(args.log_level()).init() {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match cli::run(args).await {
        Ok(true) => std::process::exit(2),
        Ok(false) => {}
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
