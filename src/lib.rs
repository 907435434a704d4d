//! Game host for arcade cabinets.
//!
//! Downloads and caches game bundles, serves each one from a sandboxed
//! loopback HTTP server and hands games private channels to host-side input
//! plugins. Native and WASM clients can mirror a channel into a shared
//! memory region instead of handling messages.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arcade_host::{GameDescriptor, HostConfig, HostOrchestrator, RenderSurface, INPUT_CLASSIC};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HostConfig::from_env().with_override("pong@LOCAL=http://localhost:5173");
//!     config.ensure_dirs()?;
//!
//!     let host = HostOrchestrator::new(&config);
//!     let pong = GameDescriptor::new("pong").with_dependency(INPUT_CLASSIC, "1.0.0");
//!
//!     // Load it into a surface
//!     let loaded = host.load_game(&pong, Arc::new(RenderSurface::new("main"))).await?;
//!     println!("serving at {}", loaded.url);
//!
//!     // The game asks for its controls
//!     let controls = loaded.channels.acquire(INPUT_CLASSIC, "^1.0.0").await?;
//!
//!     host.unload_game("pong", "LOCAL").await;
//!     Ok(())
//! }
//! ```

mod cache;
pub mod channel;
mod config;
mod error;
mod game;
pub mod input;
mod orchestrator;
mod overrides;
pub mod plugin;
mod provider;
pub mod sandbox;
mod server;
pub mod shmem;

pub use cache::*;
pub use channel::{ChannelClient, PluginChannel};
pub use config::*;
pub use error::*;
pub use game::*;
pub use orchestrator::*;
pub use overrides::*;
pub use plugin::{PluginManager, PluginRegistry, RenderSurface, INPUT_CLASSIC, INPUT_SPINNERS};
pub use provider::*;
pub use server::*;
