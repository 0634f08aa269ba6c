//! Scaler model and its lazily loaded shared handle.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::imageops::FilterType;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Scale factor of the built-in model.
pub const DEFAULT_SCALE: u32 = 2;

/// Largest accepted scale factor.
pub const MAX_SCALE: u32 = 8;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid model: {0}")]
    Invalid(String),
}

/// Resampling filter used by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    #[default]
    Lanczos3,
}

impl From<ScaleFilter> for FilterType {
    fn from(filter: ScaleFilter) -> Self {
        match filter {
            ScaleFilter::Nearest => FilterType::Nearest,
            ScaleFilter::Triangle => FilterType::Triangle,
            ScaleFilter::CatmullRom => FilterType::CatmullRom,
            ScaleFilter::Gaussian => FilterType::Gaussian,
            ScaleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Parameters of an upscaling model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScalerModel {
    pub scale: u32,
    #[serde(default)]
    pub filter: ScaleFilter,
}

impl Default for ScalerModel {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            filter: ScaleFilter::default(),
        }
    }
}

impl ScalerModel {
    /// Load a model from a JSON file such as `{"scale": 2, "filter": "lanczos3"}`,
    /// or return the built-in model when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ModelError> {
        let model = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| ModelError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str::<ScalerModel>(&raw).map_err(|e| ModelError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.scale < 1 || self.scale > MAX_SCALE {
            return Err(ModelError::Invalid(format!(
                "scale must be between 1 and {MAX_SCALE}, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Shared, lazily loaded scaler model.
///
/// The model is loaded on first use, at most once, no matter how many
/// threads race for it. A failed load is not cached, so the next job tries
/// again. Once loaded the model is only read.
#[derive(Debug, Default)]
pub struct SharedScaler {
    model_path: Option<PathBuf>,
    model: OnceCell<ScalerModel>,
    loads: AtomicUsize,
}

impl SharedScaler {
    pub fn new(model_path: Option<PathBuf>) -> Self {
        Self {
            model_path,
            model: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// The loaded model, loading it if this is the first use.
    pub fn get_or_load(&self) -> Result<&ScalerModel, ModelError> {
        self.model.get_or_try_init(|| {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let model = ScalerModel::load(self.model_path.as_deref())?;
            info!(
                path = ?self.model_path,
                scale = model.scale,
                filter = ?model.filter,
                "scaler model loaded"
            );
            Ok(model)
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Number of load attempts made so far.
    pub fn load_attempts(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn builtin_model_is_lanczos_x2() {
        let model = ScalerModel::load(None).unwrap();
        assert_eq!(model.scale, 2);
        assert_eq!(model.filter, ScaleFilter::Lanczos3);
    }

    #[test]
    fn model_file_is_parsed() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(f.path(), r#"{"scale": 4, "filter": "catmullrom"}"#).unwrap();

        let model = ScalerModel::load(Some(f.path())).unwrap();
        assert_eq!(model.scale, 4);
        assert_eq!(model.filter, ScaleFilter::CatmullRom);
    }

    #[test]
    fn out_of_range_scale_is_rejected() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(f.path(), r#"{"scale": 0}"#).unwrap();
        assert!(matches!(
            ScalerModel::load(Some(f.path())),
            Err(ModelError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_fails_and_is_retried() {
        let scaler = SharedScaler::new(Some(PathBuf::from("/nonexistent/scaler.json")));
        assert!(scaler.get_or_load().is_err());
        assert!(scaler.get_or_load().is_err());
        assert!(!scaler.is_loaded());
        assert_eq!(scaler.load_attempts(), 2);
    }

    #[test]
    fn concurrent_first_use_loads_once() {
        let scaler = Arc::new(SharedScaler::new(None));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let scaler = Arc::clone(&scaler);
                std::thread::spawn(move || scaler.get_or_load().map(|m| m.scale).unwrap())
            })
            .collect();

        for t in threads {
            assert_eq!(t.join().unwrap(), 2);
        }
        assert_eq!(scaler.load_attempts(), 1);
        assert!(scaler.is_loaded());
    }
}
