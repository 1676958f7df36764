//! `yolo clone` command - copy an image to a new name.

use clap::Args;
use yolo_runtime::oci::inject::clone_image;

use super::RegistryArgs;

#[derive(Args)]
pub struct CloneArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Image to copy, e.g. owner/model or r8.im/owner/model@sha256:hexdigest
    #[arg(short, long)]
    pub base: String,

    /// Destination image, e.g. owner/model or r8.im/owner/model
    #[arg(short, long)]
    pub dest: String,
}

pub async fn execute(args: CloneArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.registry.config();
    let registry = super::connect(&config).await?;

    let base = config.ensure_registry(&args.base);
    let dest = config.ensure_registry(&args.dest);
    tracing::info!(base = %base, dest = %dest, "Cloning image");
    let image_id = clone_image(&registry, &base, &dest).await?;

    println!("{}", image_id);
    Ok(())
}
