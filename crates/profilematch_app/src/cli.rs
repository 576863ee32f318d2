use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Upload a résumé and job description, follow the analysis, and keep the
/// latest results cached locally.
#[derive(Debug, Parser)]
#[command(name = "profilematch", version)]
pub struct Cli {
    /// RON config file (defaults to ./profilematch.ron when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, e.g. http://localhost:8000.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Directory for the response cache.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload both documents and run the analysis.
    Analyze {
        #[arg(long)]
        resume: PathBuf,
        #[arg(long)]
        jd: PathBuf,
        /// Don't stream progress while the analysis runs.
        #[arg(long)]
        no_progress: bool,
    },
    /// Follow the progress stream of a running job.
    Watch {
        /// Server-issued session id.
        job_id: String,
    },
    /// Fetch interview questions for skills (defaults to the cached missing skills).
    InterviewKit { skills: Vec<String> },
    /// Check that the backend is up.
    Health,
    /// Inspect or clear the local response cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// List cached keys.
    List,
    /// Print a cached value.
    Show { key: String },
    /// Remove one cached value.
    Remove { key: String },
    /// Remove every cached value.
    Clear,
}
