//! Yolo CLI - push source changes onto container images without a rebuild.

pub mod commands;
pub mod output;
