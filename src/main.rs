use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use arcade_host::{GameDescriptor, HostConfig, HostOrchestrator, RenderSurface};

#[derive(Debug, Parser)]
#[command(name = "arcade-host")]
#[command(about = "Run arcade games from the local cache or a dev server")]
struct Cli {
    /// Game manifest (`{"name", "version"?, "dependencies"}`) to load.
    /// Without one, the catalog is listed.
    manifest: Option<PathBuf>,

    /// Serve `name@version` from a dev server instead: `name@version=url`.
    #[arg(long = "override", value_name = "SPEC")]
    overrides: Vec<String>,

    /// Keep running after stdin closes; only Ctrl-C exits.
    #[arg(long)]
    no_exit: bool,

    /// Game cache directory.
    #[arg(long, env = "ARCADE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let cli = Cli::parse();
    let mut config = HostConfig::from_env().with_overrides(cli.overrides);
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    config.ensure_dirs()?;
    let host = HostOrchestrator::new(&config);

    let Some(manifest) = cli.manifest else {
        for game in host.get_games().await? {
            println!("{}", game.key());
        }
        return Ok(());
    };

    let raw = tokio::fs::read_to_string(&manifest).await?;
    let descriptor: GameDescriptor = serde_json::from_str(&raw)?;
    let surface = Arc::new(RenderSurface::new(descriptor.name.clone()));
    let loaded = host.load_game(&descriptor, surface).await?;
    println!("{}", loaded.url);

    if cli.no_exit {
        tokio::signal::ctrl_c().await?;
    } else {
        let mut sink = Vec::new();
        let mut stdin = tokio::io::stdin();
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = stdin.read_to_end(&mut sink) => {}
        }
    }

    tracing::info!(key = %loaded.key, "Shutting down");
    host.unload_game(&loaded.key.ident, &loaded.key.version).await;
    host.shutdown().await;
    Ok(())
}
