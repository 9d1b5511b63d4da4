// SPDX-License-Identifier: AGPL-3.0-or-later
//! Czech File Knife CLI
//!
//! A thin caller of the `cfk-vfs` façade: mounts the local filesystem
//! under one namespace and demonstrates the operations the façade
//! exposes. Not a protocol adapter — cloud backends, HTTP/FTP fronting,
//! and similar are out of scope here.

mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cfk")]
#[command(author, version, about = "Czech File Knife - Universal file management", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List directory contents
    #[command(alias = "dir")]
    Ls {
        /// Path to list (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Long format with details
        #[arg(short, long)]
        long: bool,

        /// Show all files including hidden
        #[arg(short, long)]
        all: bool,

        /// Human-readable sizes
        #[arg(short = 'H', long)]
        human: bool,

        /// Bypass the listing cache
        #[arg(short, long)]
        refresh: bool,
    },

    /// Display file contents
    Cat {
        /// File to display
        path: String,
    },

    /// Copy files or directories
    Cp {
        /// Source path
        source: String,

        /// Destination directory
        dest: String,
    },

    /// Move or rename files
    Mv {
        /// Source path
        source: String,

        /// Destination directory
        dest: String,
    },

    /// Remove files or directories
    Rm {
        /// Path(s) to remove
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Create directories
    Mkdir {
        /// Directory path(s) to create
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Show file or directory information
    Stat {
        /// Path to inspect
        path: String,
    },

    /// List mounted backends
    Backends,

    /// Show storage space information
    Df {
        /// Mount path to query
        #[arg(default_value = "/local")]
        mount: String,
    },

    /// Browse an archive's contents
    ArchiveLs {
        /// Path to the archive
        archive: String,

        /// Path inside the archive (defaults to its root)
        #[arg(default_value = "/")]
        inner: String,
    },

    /// Extract one file from an archive
    ArchiveExtract {
        /// Path to the archive
        archive: String,

        /// Path of the file inside the archive
        inner: String,

        /// Destination directory
        dest: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine = match commands::build_engine().await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Ls { path, long, all, human, refresh } => commands::ls(&engine, &path, long, all, human, refresh, cli.verbose).await,
        Commands::Cat { path } => commands::cat(&engine, &path, cli.verbose).await,
        Commands::Cp { source, dest } => commands::cp(&engine, &source, &dest, cli.verbose).await,
        Commands::Mv { source, dest } => commands::mv(&engine, &source, &dest, cli.verbose).await,
        Commands::Rm { paths } => commands::rm(&engine, &paths, cli.verbose).await,
        Commands::Mkdir { paths } => commands::mkdir(&engine, &paths, cli.verbose).await,
        Commands::Stat { path } => commands::stat(&engine, &path, cli.verbose).await,
        Commands::Backends => commands::backends(&engine, cli.verbose).await,
        Commands::Df { mount } => commands::df(&engine, &mount, cli.verbose).await,
        Commands::ArchiveLs { archive, inner } => commands::archive_ls(&engine, &archive, &inner, cli.verbose).await,
        Commands::ArchiveExtract { archive, inner, dest } => commands::archive_extract(&engine, &archive, &inner, &dest, cli.verbose).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
