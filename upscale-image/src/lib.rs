//! Image transforms plugged into the upscale job queue.
//!
//! - [`Upscaler`] - resizes by the [`SharedScaler`] model's factor and encodes PNG
//! - [`PassthroughTransform`] - returns input unchanged (fake mode)

mod model;
mod upscaler;

use std::path::PathBuf;
use std::sync::Arc;

use upscale_job_queue::Transform;

pub use model::{ModelError, ScaleFilter, ScalerModel, SharedScaler, DEFAULT_SCALE, MAX_SCALE};
pub use upscaler::{PassthroughTransform, Upscaler};

/// Build the transform for a deployment.
///
/// `fake` selects [`PassthroughTransform`]; otherwise an [`Upscaler`] with a
/// lazily loaded model from `model_path` (or the built-in model).
pub fn build_transform(fake: bool, model_path: Option<PathBuf>) -> Arc<dyn Transform> {
    if fake {
        tracing::warn!("fake transform enabled; results are the unmodified input");
        return Arc::new(PassthroughTransform);
    }
    Arc::new(Upscaler::new(Arc::new(SharedScaler::new(model_path))))
}
