//! Shared runtime context for the landmarker tasks.
//!
//! A [`VisionRuntime`] knows where model bundles live. A bundle is a directory containing the ONNX
//! networks of one task (eg. `hand_landmarker/palm_detection.onnx`). Bundles are looked up in a
//! local directory, and downloaded from a remote base URL into that directory if missing.

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use reqwest::blocking::Client;

use crate::{error::ModelError, nn::NeuralNetwork};

/// Inference delegate preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    Cpu,
    /// Requests GPU inference. Networks run on the CPU when no GPU backend is available.
    Gpu,
}

impl FromStr for Delegate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            _ => Err("expected `cpu` or `gpu`".into()),
        }
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Delegate::Cpu => "CPU",
            Delegate::Gpu => "GPU",
        })
    }
}

/// Options shared by all landmarker tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseOptions {
    /// Bundle name relative to the model directory, a local directory path, or an `http(s)://`
    /// URL of a bundle.
    pub model_asset_path: String,
    pub delegate: Delegate,
}

impl BaseOptions {
    pub fn new(model_asset_path: impl Into<String>) -> Self {
        Self {
            model_asset_path: model_asset_path.into(),
            delegate: Delegate::Gpu,
        }
    }

    pub fn with_delegate(mut self, delegate: Delegate) -> Self {
        self.delegate = delegate;
        self
    }
}

/// Where to find model bundles.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOptions {
    /// Local bundle directory, also used as the download cache.
    pub model_dir: PathBuf,
    /// Base URL that bundles are downloaded from when not found locally.
    pub model_url: Option<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_url: None,
        }
    }
}

/// The shared runtime context that landmarkers are created against.
///
/// This is a cheaply [`Clone`]able handle.
#[derive(Clone)]
pub struct VisionRuntime {
    store: Arc<ModelStore>,
    gpu_warned: Arc<AtomicBool>,
}

impl VisionRuntime {
    /// Resolves the runtime context described by `options`.
    ///
    /// This creates the model directory if necessary. No bundle is fetched yet.
    pub fn resolve(options: &RuntimeOptions) -> anyhow::Result<Self> {
        let store = ModelStore::new(options.model_dir.clone(), options.model_url.clone())?;
        log::debug!(
            "model store at '{}' (remote: {})",
            store.dir().display(),
            options.model_url.as_deref().unwrap_or("none"),
        );
        Ok(Self {
            store: Arc::new(store),
            gpu_warned: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Loads network `file` from the bundle named by `options`.
    ///
    /// If `outputs` is given, only those network outputs are computed, in that order.
    pub fn load_network(
        &self,
        options: &BaseOptions,
        file: &str,
        outputs: Option<&[usize]>,
    ) -> anyhow::Result<NeuralNetwork> {
        self.check_delegate(options.delegate);

        let path = self.store.fetch(&options.model_asset_path, file)?;
        let mut loader = NeuralNetwork::from_path(&path)?;
        if let Some(outputs) = outputs {
            loader = loader.with_output_selection(outputs);
        }
        let nn = loader
            .load()
            .with_context(|| format!("failed to load network '{}'", path.display()))?;
        log::debug!("loaded '{}'", path.display());
        Ok(nn)
    }

    /// Reads an optional auxiliary `file` from the bundle named by `options`.
    ///
    /// Returns `Ok(None)` if the bundle doesn't contain the file.
    pub fn read_optional(
        &self,
        options: &BaseOptions,
        file: &str,
    ) -> anyhow::Result<Option<String>> {
        match self.store.fetch(&options.model_asset_path, file) {
            Ok(path) => {
                let data = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read '{}'", path.display()))?;
                Ok(Some(data))
            }
            Err(ModelError::Missing { .. } | ModelError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn check_delegate(&self, delegate: Delegate) {
        if delegate == Delegate::Gpu && !self.gpu_warned.swap(true, Ordering::Relaxed) {
            log::warn!("GPU delegate is not available, running inference on the CPU");
        }
    }
}

/// Local model directory with optional remote download.
pub struct ModelStore {
    dir: PathBuf,
    base_url: Option<String>,
    client: Client,
}

impl ModelStore {
    pub fn new(dir: PathBuf, base_url: Option<String>) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create model directory '{}'", dir.display()))?;
        let client = Client::builder()
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            dir,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            client,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the local path of `file` inside `asset`, downloading it first if necessary.
    pub fn fetch(&self, asset: &str, file: &str) -> Result<PathBuf, ModelError> {
        if is_url(asset) {
            let asset = asset.trim_end_matches('/');
            let name = asset.rsplit('/').next().unwrap_or(asset);
            let local = self.dir.join(name).join(file);
            if local.is_file() {
                return Ok(local);
            }
            return self.download(&format!("{asset}/{file}"), &local);
        }

        let asset_path = Path::new(asset);
        if asset_path.is_absolute() || asset_path.is_dir() {
            let local = asset_path.join(file);
            return if local.is_file() {
                Ok(local)
            } else {
                Err(ModelError::Missing {
                    asset: format!("{asset}/{file}"),
                    dir: asset_path.to_path_buf(),
                })
            };
        }

        let local = self.dir.join(asset).join(file);
        if local.is_file() {
            return Ok(local);
        }
        match &self.base_url {
            Some(base) => self.download(&format!("{base}/{asset}/{file}"), &local),
            None => Err(ModelError::Missing {
                asset: format!("{asset}/{file}"),
                dir: self.dir.clone(),
            }),
        }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, ModelError> {
        log::info!("downloading {url}");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| ModelError::Download {
                url: url.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(ModelError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().map_err(|source| ModelError::Download {
            url: url.to_string(),
            source,
        })?;

        let io_err = |source| ModelError::Io {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Only complete downloads are renamed into place.
        let tmp = dest.with_extension("part");
        let mut out = fs::File::create(&tmp).map_err(io_err)?;
        out.write_all(&bytes).map_err(io_err)?;
        out.sync_all().map_err(io_err)?;
        fs::rename(&tmp, dest).map_err(io_err)?;

        log::info!("stored {} bytes at '{}'", bytes.len(), dest.display());
        Ok(dest.to_path_buf())
    }
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delegate() {
        assert_eq!("gpu".parse::<Delegate>(), Ok(Delegate::Gpu));
        assert_eq!(" CPU ".parse::<Delegate>(), Ok(Delegate::Cpu));
        assert!("npu".parse::<Delegate>().is_err());
        assert_eq!(Delegate::Gpu.to_string(), "GPU");
    }

    #[test]
    fn fetch_local_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("hand_landmarker");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("hand_landmark.onnx"), b"onnx").unwrap();

        let store = ModelStore::new(dir.path().to_path_buf(), None).unwrap();
        assert_eq!(
            store.fetch("hand_landmarker", "hand_landmark.onnx").unwrap(),
            bundle.join("hand_landmark.onnx")
        );

        // Absolute bundle paths bypass the model directory.
        let abs = bundle.to_str().unwrap();
        assert_eq!(
            store.fetch(abs, "hand_landmark.onnx").unwrap(),
            bundle.join("hand_landmark.onnx")
        );
    }

    #[test]
    fn missing_bundle_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("cache"), None).unwrap();
        assert!(store.dir().is_dir());

        let err = store.fetch("pose_landmarker", "pose_detection.onnx").unwrap_err();
        assert!(matches!(err, ModelError::Missing { .. }), "{err}");
    }

    #[test]
    fn optional_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = VisionRuntime::resolve(&RuntimeOptions {
            model_dir: dir.path().to_path_buf(),
            model_url: None,
        })
        .unwrap();
        let options = BaseOptions::new("face_landmarker").with_delegate(Delegate::Cpu);
        assert_eq!(
            runtime
                .read_optional(&options, "canonical_face_model.obj")
                .unwrap(),
            None
        );
        assert!(runtime
            .load_network(&options, "face_landmark.onnx", None)
            .is_err());
    }
}
