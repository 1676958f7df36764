//! Predictor schema extraction.
//!
//! The OpenAPI schema of a predictor is produced by an external tool; this
//! module only runs it and collects its output.

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use yolo_core::error::{Result, YoloError};

/// Produces the OpenAPI schema string for a predictor source file.
#[async_trait]
pub trait SchemaParser: Send + Sync {
    async fn parse(&self, predictor: &Path) -> Result<String>;
}

/// Runs `program args... <predictor>` and returns its trimmed stdout.
#[derive(Debug, Clone)]
pub struct CommandSchemaParser {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandSchemaParser {
    pub fn new<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for CommandSchemaParser {
    fn default() -> Self {
        Self::new("python3", ["-m", "cog.command.ast_openapi_schema"])
    }
}

#[async_trait]
impl SchemaParser for CommandSchemaParser {
    async fn parse(&self, predictor: &Path) -> Result<String> {
        tracing::info!(predictor = %predictor.display(), "Parsing predictor schema");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(predictor)
            .output()
            .await
            .map_err(|e| {
                YoloError::SchemaParse(format!(
                    "Failed to run {}: {}",
                    self.program.to_string_lossy(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(YoloError::SchemaParse(format!(
                "{} exited with {}: {}",
                self.program.to_string_lossy(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let schema = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(length = schema.len(), "Parsed predictor schema");
        Ok(schema)
    }
}
