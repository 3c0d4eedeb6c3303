//! `fetch-cli`: ask an `audio-fetch-server` to download and tag a track.

mod server_api;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "fetch-cli", version = VERSION)]
struct Args {
    /// Base URL of the fetch server
    #[arg(long, global = true, default_value = "http://127.0.0.1:3333")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a video's audio as a tagged MP3.
    Download {
        /// Video id or URL.
        id: String,
        /// MusicBrainz recording id used for tagging.
        #[arg(long)]
        musicbrainz_id: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Download { id, musicbrainz_id } => {
            let resp = server_api::download(&args.server, &id, musicbrainz_id.as_deref())?;
            println!("{}", resp.summary());
            println!("file: {}", resp.file_name);
            println!("type: {}", resp.mime_type);
            println!("size: {}", format_size(resp.size_bytes));
        }
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {} ({bytes} bytes)", UNITS[unit])
    }
}
