use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Collect Bandcamp release notifications for a date range, using
    /// the local cache and fetching only missing days from Gmail.
    Gather(GatherArgs),
    /// Clear the local caches.
    Reset(ResetArgs),
    /// Render the static HTML dashboard from cached releases.
    Dashboard(DashboardArgs),
    /// Run the local embed-metadata relay for the dashboard.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct GatherArgs {
    /// Earliest date, YYYY/MM/DD.
    #[arg(long)]
    pub after: String,

    /// Latest date, YYYY/MM/DD (default: today).
    #[arg(long)]
    pub before: Option<String>,

    /// Maximum releases to return; 0 means no cap.
    #[arg(long, default_value_t = 2000)]
    pub max_results: usize,

    /// Message download chunk size.
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Directory holding the release and empty-date caches.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// File with the Gmail OAuth bearer token (BCFEED_GMAIL_TOKEN overrides).
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    /// Write the gathered releases to this JSON file instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Directory holding the release and empty-date caches.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Clear the per-day release cache.
    #[arg(long)]
    pub cache: bool,

    /// Clear the known-empty date markers.
    #[arg(long)]
    pub empty: bool,

    /// Clear both caches.
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    /// Earliest date, YYYY/MM/DD.
    #[arg(long)]
    pub after: String,

    /// Latest date, YYYY/MM/DD.
    #[arg(long)]
    pub before: String,

    /// Maximum releases to render; 0 means no cap.
    #[arg(long, default_value_t = 2000)]
    pub max_results: usize,

    /// Releases per output page.
    #[arg(long, default_value_t = 50)]
    pub per_page: usize,

    /// Directory holding the caches.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Output directory for the dashboard pages.
    #[arg(long, default_value = "dashboard")]
    pub out: PathBuf,

    /// Scrape Bandcamp pages for embed metadata missing from the cache.
    #[arg(long)]
    pub fetch_embeds: bool,

    /// Base URL of the `bcfeed serve` relay the pages talk to.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub relay_url: String,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Directory holding the caches.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub addr: SocketAddr,
}
