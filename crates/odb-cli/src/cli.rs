use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "odb",
    about = "ODB: content-addressed object database",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./odb.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add files to the cache
    Put(PutArgs),
    /// Write an object's content to a file or stdout
    Get(GetArgs),
    /// Check whether objects exist
    Contains(RefsArgs),
    /// Remove objects
    Rm(RefsArgs),
    /// List stored objects
    Ls(LsArgs),
    /// Compare the cache with a remote
    Status(RemoteRefsArgs),
    /// Upload objects from the cache to a remote
    Push(RemoteRefsArgs),
    /// Download objects from a remote into the cache
    Pull(RemoteRefsArgs),
    /// Delete unreferenced objects and stale temp files
    Gc(GcArgs),
    /// Re-hash stored objects and report corruption
    Verify(RefsArgs),
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    /// Reference or unique digest prefix
    pub reference: String,
    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[arg(short, long)]
    pub remote: Option<String>,
}

#[derive(Args)]
pub struct RefsArgs {
    /// References or unique digest prefixes; all objects when omitted
    pub references: Vec<String>,
    #[arg(short, long)]
    pub remote: Option<String>,
}

#[derive(Args)]
pub struct LsArgs {
    /// Only list one shard directory (two hex characters)
    #[arg(long)]
    pub shard: Option<String>,
    #[arg(short, long)]
    pub remote: Option<String>,
}

#[derive(Args)]
pub struct RemoteRefsArgs {
    /// References to consider; every object on the sending side when omitted
    pub references: Vec<String>,
    #[arg(short, long)]
    pub remote: Option<String>,
    /// Override the configured concurrency
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct GcArgs {
    /// Objects to keep; everything else is removed
    #[arg(long = "keep")]
    pub keep: Vec<String>,
    /// Temp files younger than this many seconds are left alone
    #[arg(long, default_value = "3600")]
    pub grace_secs: u64,
    /// Allow removing every object when no --keep is given
    #[arg(long)]
    pub all: bool,
    #[arg(short, long)]
    pub remote: Option<String>,
}
