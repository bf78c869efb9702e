use std::fs;
use std::path::Path;
use anyhow::{Result, Context as AnyhowContext};
use crate::dispatch::node::Node;

/// Reads a YAML sequence of nodes (`- ip: ..., port: ..., <metadata>`).
pub fn load_nodes_from_yaml(file_path: impl AsRef<Path>) -> Result<Vec<Node>> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read node list from {}", file_path.display()))?;

    let nodes: Vec<Node> = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize node list from {}", file_path.display()))?;

    Ok(nodes)
}
