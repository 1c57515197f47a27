// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # ondevice-rt
//!
//! Command-line interface for the on-device runtime.
//!
//! ## Usage
//! ```bash
//! # Probe the device
//! ondevice-rt status
//!
//! # List the catalog
//! ondevice-rt --config runtime.toml models
//!
//! # Install a model from its archive
//! ondevice-rt --config runtime.toml fetch tinyllama-q4
//!
//! # Load and generate, streaming tokens (Ctrl-C cancels)
//! ondevice-rt --config runtime.toml generate tinyllama-q4 --prompt "Hello" --stream
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ondevice-rt",
    about = "On-device model loading and token generation",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the probed device profile.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List the models in the manifest.
    Models {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Install a model's files from its archive.
    Fetch {
        /// Model id from the manifest.
        model: String,

        /// Archive to extract instead of the manifest's reference.
        #[arg(short, long)]
        archive: Option<PathBuf>,
    },

    /// Load a model and generate text.
    Generate(commands::generate::GenerateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Status { json } => commands::status::execute(config, json).await,
        Commands::Models { json } => commands::models::execute(config, json),
        Commands::Fetch { model, archive } => commands::fetch::execute(config, model, archive).await,
        Commands::Generate(args) => commands::generate::execute(config, args).await,
    }
}
