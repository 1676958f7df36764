//! CLI command definitions and dispatch.

mod clone;
mod deps;
mod fetch;
mod push;
mod stream_layered_image;

use clap::{Args, Parser, Subcommand};
use yolo_core::config::{YoloConfig, DEFAULT_REGISTRY};
use yolo_runtime::oci::auth::{authenticate, HttpTokenVerifier};
use yolo_runtime::oci::registry::RegistryClient;

/// Yolo - push source changes onto container images without a rebuild.
#[derive(Parser)]
#[command(name = "yolo", version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Push files onto an existing image as a new source layer
    Push(push::PushArgs),
    /// Copy an existing image to a new name
    Clone(clone::CloneArgs),
    /// Print the commands that install an image's cog dependencies
    Deps(deps::DepsArgs),
    /// Extract the newest layer of an image into a new directory
    Fetch(fetch::FetchArgs),
    /// Build a layered image from a build spec and push or load it
    StreamLayeredImage(stream_layered_image::StreamLayeredImageArgs),
}

/// Registry flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Registry token (falls back to REPLICATE_API_TOKEN, then COG_TOKEN)
    #[arg(short, long)]
    pub token: Option<String>,

    /// Registry host
    #[arg(short, long, default_value = DEFAULT_REGISTRY)]
    pub registry: String,
}

impl RegistryArgs {
    /// Resolve flags and environment into an explicit config.
    pub fn config(&self) -> YoloConfig {
        YoloConfig::new(self.registry.clone(), self.token.clone())
    }
}

/// Verify the configured token and build an authenticated registry client.
pub(crate) async fn connect(config: &YoloConfig) -> Result<RegistryClient, Box<dyn std::error::Error>> {
    tracing::debug!(registry = %config.registry, token = config.token.is_some(), "Connecting");
    let auth = authenticate(config, &HttpTokenVerifier::new())
        .await
        .map_err(|e| {
            eprintln!("authentication error, invalid token or registry host error");
            e
        })?;
    Ok(RegistryClient::with_auth(auth))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Push(args) => push::execute(args).await,
        Command::Clone(args) => clone::execute(args).await,
        Command::Deps(args) => deps::execute(args).await,
        Command::Fetch(args) => fetch::execute(args).await,
        Command::StreamLayeredImage(args) => stream_layered_image::execute(args).await,
    }
}
