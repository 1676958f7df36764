//! `yolo push` command - push files onto an existing image.

use std::path::PathBuf;

use clap::Args;
use yolo_runtime::oci::inject::{push_files, InjectRequest};
use yolo_runtime::oci::merge::LayerFile;
use yolo_runtime::oci::schema::{CommandSchemaParser, SchemaParser};

use super::RegistryArgs;

#[derive(Args)]
pub struct PushArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Base image reference, e.g. owner/model or r8.im/owner/model@sha256:hexdigest
    #[arg(short, long)]
    pub base: String,

    /// Destination image reference, e.g. owner/model or r8.im/owner/model
    #[arg(short, long)]
    pub dest: String,

    /// Environment entry to set (KEY=VALUE), repeatable
    #[arg(short, long)]
    pub env: Vec<String>,

    /// Commit hash recorded in the revision label
    #[arg(short, long)]
    pub commit: Option<String>,

    /// Predictor file whose OpenAPI schema is recorded in the image labels
    #[arg(short, long)]
    pub predictor: Option<PathBuf>,

    /// Place files at src/<path as given> instead of src/<name>
    #[arg(long)]
    pub relative: bool,

    /// Files to add under /src
    pub files: Vec<PathBuf>,
}

pub async fn execute(args: PushArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.registry.config();
    let registry = super::connect(&config).await?;

    let files = args
        .files
        .iter()
        .map(|path| LayerFile::from_path(path, args.relative))
        .collect::<Result<Vec<_>, _>>()?;
    for file in &files {
        eprintln!("adding: {}", file.path());
    }

    let schema = match &args.predictor {
        Some(predictor) => Some(CommandSchemaParser::default().parse(predictor).await?),
        None => None,
    };

    let request = InjectRequest {
        base: config.ensure_registry(&args.base),
        dest: config.ensure_registry(&args.dest),
        files,
        schema,
        commit: args.commit,
        env: args.env,
    };
    tracing::info!(
        base = %request.base,
        dest = %request.dest,
        files = request.files.len(),
        "Pushing source layer"
    );
    let image_id = push_files(&registry, &request).await?;

    println!("{}", image_id);
    Ok(())
}
