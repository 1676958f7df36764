//! `yolo deps` command - print install commands for an image's dependencies.

use clap::Args;
use yolo_runtime::oci::cog::dependencies;

use super::RegistryArgs;

#[derive(Args)]
pub struct DepsArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Image built by cog, e.g. owner/model or r8.im/owner/model@sha256:hexdigest
    pub image: String,
}

pub async fn execute(args: DepsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.registry.config();
    let registry = super::connect(&config).await?;

    let reference = config.ensure_registry(&args.image);
    tracing::info!(image = %reference, "Reading cog config");
    for command in dependencies(&registry, &reference).await? {
        println!("{}", command);
    }
    Ok(())
}
