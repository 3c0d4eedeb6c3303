//! `audio-fetch-server`: download a video's audio, tag it from MusicBrainz and
//! store it as MP3.

mod api;
mod config;
mod error;
mod extractor;
mod files;
mod models;
mod musicbrainz;
mod openapi;
mod pipeline;
mod startup;
mod state;
mod tags;
mod transcode;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
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
#[command(name = "audio-fetch-server", version = VERSION)]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:3333
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Directory that receives downloaded files
    #[arg(long, env = config::OUTPUT_DIR_ENV)]
    output_dir: Option<PathBuf>,

    /// Optional server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,audio_fetch_server=info")
        }))
        .init();

    startup::run(args).await
}
