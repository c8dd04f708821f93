//! Model asset management for ONNX Runtime
//!
//! The inference runtime needs real filesystem paths, so the bundled read-only
//! assets are copied into a writable cache before loading. A manifest records
//! size and SHA-256 of every copy to catch truncated or corrupted caches.

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::preprocess::Tensor;
use super::stage::{InferenceGraph, StageOutput};
use crate::config::AssetSettings;

/// Bundled asset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Text detection model (DBNet)
    Detector,
    /// Text direction classifier
    Classifier,
    /// Text recognition model (CRNN)
    Recognizer,
    /// Character dictionary for recognition
    Labels,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [
        AssetKind::Detector,
        AssetKind::Classifier,
        AssetKind::Recognizer,
        AssetKind::Labels,
    ];

    /// Display name for logging
    pub fn display_name(&self) -> &'static str {
        match self {
            AssetKind::Detector => "Text Detection",
            AssetKind::Classifier => "Text Classifier",
            AssetKind::Recognizer => "Text Recognition",
            AssetKind::Labels => "Character Dictionary",
        }
    }
}

/// Manifest tracking cached copies
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AssetManifest {
    pub assets: Vec<AssetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AssetInfo {
    /// Logical path inside the bundle
    pub logical_path: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds of the copy
    pub copied_at: u64,
}

impl AssetManifest {
    fn entry(&self, logical_path: &str) -> Option<&AssetInfo> {
        self.assets.iter().find(|a| a.logical_path == logical_path)
    }

    fn upsert(&mut self, info: AssetInfo) {
        if let Some(existing) = self.assets.iter_mut().find(|a| a.logical_path == info.logical_path) {
            *existing = info;
        } else {
            self.assets.push(info);
        }
    }
}

/// Copies bundled assets into the cache and hands out their paths
pub struct AssetStore {
    bundle_dir: PathBuf,
    cache_dir: PathBuf,
    settings: AssetSettings,
}

impl AssetStore {
    /// Create a store reading from `bundle_dir` and writing into `cache_dir`
    pub fn new(bundle_dir: PathBuf, cache_dir: PathBuf, settings: AssetSettings) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create asset cache {:?}", cache_dir))?;

        Ok(Self {
            bundle_dir,
            cache_dir,
            settings,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Stable logical path of an asset
    pub fn logical_path(&self, kind: AssetKind) -> &str {
        match kind {
            AssetKind::Detector => &self.settings.detector,
            AssetKind::Classifier => &self.settings.classifier,
            AssetKind::Recognizer => &self.settings.recognizer,
            AssetKind::Labels => &self.settings.labels,
        }
    }

    /// Where the cached copy of an asset lives
    pub fn cached_path(&self, kind: AssetKind) -> PathBuf {
        self.cache_dir.join(self.logical_path(kind))
    }

    fn bundled_path(&self, kind: AssetKind) -> PathBuf {
        self.bundle_dir.join(self.logical_path(kind))
    }

    /// Status of all assets: (kind, cached, size)
    pub fn asset_status(&self) -> Vec<(AssetKind, bool, Option<u64>)> {
        AssetKind::ALL
            .iter()
            .map(|&kind| {
                let size = std::fs::metadata(self.cached_path(kind)).ok().map(|m| m.len());
                (kind, size.is_some(), size)
            })
            .collect()
    }

    /// Copy an asset into the cache unless a verified copy is already there.
    /// Returns the cached path.
    pub fn ensure_cached(&self, kind: AssetKind) -> Result<PathBuf> {
        let logical = self.logical_path(kind).to_string();
        let target = self.cached_path(kind);

        let mut manifest = self.load_manifest().unwrap_or_else(|e| {
            warn!("Asset manifest unreadable, rebuilding: {:#}", e);
            AssetManifest::default()
        });

        if target.exists() {
            match verify_cached(&target, manifest.entry(&logical)) {
                Ok(Some(info)) => {
                    // Cache predates the manifest; adopt it
                    manifest.upsert(AssetInfo {
                        logical_path: logical,
                        ..info
                    });
                    self.save_manifest(&manifest)?;
                    return Ok(target);
                }
                Ok(None) => {
                    debug!("{} already cached at {:?}", kind.display_name(), target);
                    return Ok(target);
                }
                Err(reason) => {
                    warn!(
                        "Cached {} at {:?} is corrupted ({}), copying again",
                        kind.display_name(),
                        target,
                        reason
                    );
                }
            }
        }

        let source = self.bundled_path(kind);
        if !source.is_file() {
            anyhow::bail!(
                "{} asset '{}' is missing from the bundle (looked for {:?})",
                kind.display_name(),
                logical,
                source
            );
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {:?}", parent))?;
        }

        let temp_path = target.with_extension("part");
        std::fs::copy(&source, &temp_path)
            .with_context(|| format!("Failed to copy {:?} into the cache", source))?;
        std::fs::rename(&temp_path, &target)
            .context("Failed to move copied asset to final location")?;

        let (size_bytes, sha256) = hash_file(&target)?;
        info!(
            "Cached {} ({} bytes) at {:?}",
            kind.display_name(),
            size_bytes,
            target
        );

        manifest.upsert(AssetInfo {
            logical_path: logical,
            size_bytes,
            sha256,
            copied_at: unix_now(),
        });
        self.save_manifest(&manifest)?;

        Ok(target)
    }

    /// Load the asset manifest
    pub fn load_manifest(&self) -> Result<AssetManifest> {
        let manifest_path = self.cache_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: AssetManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(AssetManifest::default())
        }
    }

    /// Save the asset manifest
    pub fn save_manifest(&self, manifest: &AssetManifest) -> Result<()> {
        let manifest_path = self.cache_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Check a cached copy against its manifest entry.
///
/// `Ok(None)` means verified, `Ok(Some(info))` means there was no entry and
/// `info` describes the file as found.
fn verify_cached(path: &Path, expected: Option<&AssetInfo>) -> Result<Option<AssetInfo>, String> {
    let (size_bytes, sha256) = hash_file(path).map_err(|e| format!("{:#}", e))?;
    if size_bytes == 0 {
        return Err("empty file".to_string());
    }

    match expected {
        Some(info) if info.size_bytes != size_bytes => Err(format!(
            "size {} does not match manifest {}",
            size_bytes, info.size_bytes
        )),
        Some(info) if info.sha256 != sha256 => Err("checksum mismatch".to_string()),
        Some(_) => Ok(None),
        None => Ok(Some(AssetInfo {
            logical_path: String::new(),
            size_bytes,
            sha256,
            copied_at: unix_now(),
        })),
    }
}

/// Size and hex SHA-256 of a file
fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {:?}", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok((size, format!("{:x}", hasher.finalize())))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        if !model_path.is_file() {
            anyhow::bail!("Model file not found: {:?}", model_path);
        }

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self { session, input_names })
    }
}

impl InferenceGraph for OnnxSession {
    fn infer(&mut self, input: Tensor) -> Result<StageOutput> {
        let input_name = self
            .input_names
            .first()
            .cloned()
            .context("Model declares no inputs")?;

        let (shape, values) = input.into_raw();
        let value = ort::value::Tensor::from_array((shape, values))?;

        let outputs = self.session.run(ort::inputs![input_name.as_str() => value])?;
        let (output_shape, output_data) = outputs[0].try_extract_tensor::<f32>()?;

        let shape: Vec<usize> = output_shape.iter().map(|&d| d.max(0) as usize).collect();
        StageOutput::new(shape.clone(), output_data.to_vec())
            .with_context(|| format!("Output data does not fill shape {:?}", shape))
    }
}
