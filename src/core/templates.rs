//! Prebuilt pipeline definitions shipped with the engine
//!
//! Each template is a definition file compiled into the binary. Handler
//! names are placeholders the caller registers before running one.

use crate::core::config::PipelineFile;
use crate::core::error::EngineError;
use crate::core::pipeline::Pipeline;
use anyhow::{Context, Result};

/// Template ids in catalog order, with their definition files
const CATALOG: &[(&str, &str)] = &[
    (
        "content-publish-v1",
        include_str!("../../templates/content_publish.yaml"),
    ),
    (
        "video-processing-v1",
        include_str!("../../templates/video_processing.yaml"),
    ),
    (
        "hotspot-analysis-v1",
        include_str!("../../templates/hotspot_analysis.yaml"),
    ),
    (
        "data-collection-v1",
        include_str!("../../templates/data_collection.yaml"),
    ),
];

/// Ids of every bundled template
pub fn template_ids() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|(id, _)| *id)
}

/// Build the template with the given id
pub fn template(id: &str) -> Result<Pipeline> {
    let (_, source) = CATALOG
        .iter()
        .find(|(template_id, _)| *template_id == id)
        .ok_or_else(|| EngineError::NotFound {
            kind: "Template",
            id: id.to_string(),
        })?;

    template_file(id, source).map(|file| file.to_pipeline())
}

/// Build every bundled template, in catalog order
pub fn list_templates() -> Result<Vec<Pipeline>> {
    CATALOG
        .iter()
        .map(|(id, source)| template_file(id, source).map(|file| file.to_pipeline()))
        .collect()
}

fn template_file(id: &str, source: &str) -> Result<PipelineFile> {
    PipelineFile::from_yaml(source).with_context(|| format!("Bundled template {} is invalid", id))
}
