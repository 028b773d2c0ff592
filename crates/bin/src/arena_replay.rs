//! Arena replay - re-simulate recorded matches and check every bundle.

use clap::Parser;
use sim::{Replay, ReplayPlayer};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify or play back voxel arena replays", long_about = None)]
struct Cli {
    /// Replay files to check.
    #[arg(required = true)]
    replays: Vec<PathBuf>,
    /// Server config providing the tick rate for paced playback. Simulation
    /// settings come from the replay itself.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Play back at this multiple of the recorded tick rate instead of as
    /// fast as possible.
    #[arg(long)]
    speed: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = server::Config::load_from(&cli.config)?;

    let mut failed = 0;
    for path in &cli.replays {
        let replay = Replay::load(path)?;
        info!(
            "{}: {} ticks, {} participants, seed {}",
            path.display(),
            replay.last_tick(),
            replay.participants.len(),
            replay.config.seed
        );
        let verification = match cli.speed {
            Some(speed) => {
                let mut player = ReplayPlayer::new(replay);
                let mut engine = player.build_engine()?;
                let interval = Duration::from_millis(config.server.tick_interval_ms);
                player.play_paced(&mut engine, interval, speed).await?
            }
            None => ReplayPlayer::verify(replay)?,
        };
        match verification.first_mismatch {
            None => info!("{}: ok ({} ticks)", path.display(), verification.ticks),
            Some(tick) => {
                error!("{}: diverged at tick {}", path.display(), tick);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} replays diverged", failed, cli.replays.len());
    }
    Ok(())
}
