//! Cog build config carried in image labels.
//!
//! Images built by cog record their `cog.yaml` as JSON under a config
//! label. The build section lists the system packages, Python packages and
//! run steps needed to reproduce the image's environment.

use serde::{Deserialize, Serialize};
use yolo_core::error::{Result, YoloError};

use super::image::ImageSource;
use super::registry::Registry;

/// Labels holding the cog config, in lookup order.
pub const COG_CONFIG_LABELS: [&str; 2] = ["org.cogmodel.config", "run.cog.config"];

/// A cache or secret mount attached to a run step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMount {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

/// One `run` step of the build section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<RunMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CogBuild {
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub python_packages: Vec<String>,
    #[serde(default)]
    pub system_packages: Vec<String>,
    #[serde(default)]
    pub run: Vec<RunItem>,
    #[serde(default)]
    pub cuda: String,
    #[serde(default)]
    pub cudnn: String,
}

impl CogBuild {
    /// Shell commands that install this build's dependencies: apt packages,
    /// then pip packages, then each run step verbatim.
    pub fn install_commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if !self.system_packages.is_empty() {
            commands.push(with_quoted("apt-get install -y", &self.system_packages));
        }
        if !self.python_packages.is_empty() {
            commands.push(with_quoted(
                "python3 -m pip install --no-cache-dir",
                &self.python_packages,
            ));
        }
        commands.extend(self.run.iter().map(|item| item.command.clone()));
        commands
    }
}

fn with_quoted(prefix: &str, packages: &[String]) -> String {
    packages.iter().fold(prefix.to_string(), |mut line, package| {
        line.push_str(" \"");
        line.push_str(package);
        line.push('"');
        line
    })
}

/// The cog config recorded on an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CogConfig {
    #[serde(default)]
    pub build: CogBuild,
    /// Predictor entry point, e.g. `predict.py:Predictor`
    #[serde(default)]
    pub predict: String,
}

impl CogConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| YoloError::Serialization(format!("error unmarshalling cog config: {e}")))
    }
}

/// Read the cog config from an image's labels.
pub fn cog_config<S: ImageSource + ?Sized>(source: &S) -> Result<CogConfig> {
    let config = source.config_file()?;
    let raw = COG_CONFIG_LABELS
        .iter()
        .filter_map(|key| config.config.labels.get(*key))
        .find(|value| !value.is_empty())
        .ok_or_else(|| YoloError::ConfigUnavailable("no cog config found".to_string()))?;
    CogConfig::from_json(raw)
}

/// Pull `reference` and list the commands that install its dependencies.
pub async fn dependencies(registry: &dyn Registry, reference: &str) -> Result<Vec<String>> {
    let image = registry.pull(reference).await?;
    let config = cog_config(&image)?;
    tracing::debug!(
        reference = %reference,
        system = config.build.system_packages.len(),
        python = config.build.python_packages.len(),
        run = config.build.run.len(),
        "Read cog config"
    );
    Ok(config.build.install_commands())
}
