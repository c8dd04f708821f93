//! Label table for the recognition model
//!
//! One glyph per line; line `i` is the label of model class `i`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Ordered glyph labels indexed by class id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse a newline-delimited label file.
    ///
    /// Only line terminators are stripped, so whitespace glyphs survive.
    pub fn parse(content: &str) -> Self {
        Self::new(content.lines().map(str::to_string).collect())
    }

    /// Load the label file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read label file: {:?}", path))?;
        let table = Self::parse(&content);
        if table.is_empty() {
            anyhow::bail!("Label file {:?} contains no labels", path);
        }
        info!("Loaded {} labels from {:?}", table.len(), path);
        Ok(table)
    }

    /// Label of class `index`, or `None` when out of range
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
