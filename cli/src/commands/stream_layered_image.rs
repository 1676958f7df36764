//! `yolo stream-layered-image` command - build an image from store paths.

use std::path::PathBuf;

use clap::Args;
use yolo_core::config::BuildOptions;
use yolo_runtime::oci::build::{build, BuildSpec};
use yolo_runtime::oci::store::ImageStore;

use super::RegistryArgs;

#[derive(Args)]
pub struct StreamLayeredImageArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Build spec (JSON, or YAML by extension)
    pub spec: PathBuf,

    /// Load into the local image store instead of pushing
    #[arg(short, long)]
    pub local: bool,
}

pub async fn execute(args: StreamLayeredImageArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec = BuildSpec::from_file(&args.spec)?;
    let options = BuildOptions::with_local(args.local);

    let config = args.registry.config();
    let registry = super::connect(&config).await?;
    let store = ImageStore::new(&ImageStore::default_dir()?)?;

    if args.local {
        eprintln!("writing to local image store, tag: {}", spec.repo_tag);
    }
    let result = build(&spec, &options, &registry, &store).await?;
    tracing::info!(
        reference = %result.reference,
        layers = result.layer_count,
        "Built layered image"
    );

    println!("{}", result.image_id);
    Ok(())
}
