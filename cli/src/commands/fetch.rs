//! `yolo fetch` command - extract the newest layer of an image.

use std::path::PathBuf;

use clap::Args;
use yolo_runtime::oci::extract::fetch;

use super::RegistryArgs;
use crate::output::format_extract_summary;

#[derive(Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Image to fetch, e.g. owner/model or r8.im/owner/model@sha256:hexdigest
    #[arg(short, long)]
    pub base: String,

    /// Directory to create and extract into
    pub dest: PathBuf,
}

pub async fn execute(args: FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.registry.config();
    let registry = super::connect(&config).await?;

    let reference = config.ensure_registry(&args.base);
    tracing::info!(image = %reference, dest = %args.dest.display(), "Fetching newest layer");
    let summary = fetch(&registry, &reference, &args.dest).await?;

    println!(
        "{}",
        format_extract_summary(summary.bytes, summary.elapsed, summary.throughput())
    );
    Ok(())
}
