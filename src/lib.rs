//! 学習済みCNN分類器のGrad-CAMヒートマップを元画像に重ねて表示用画像を作るライブラリ
//!
//! ```no_run
//! use gradcam_overlay_lib::{grad_cam, TARGET_LAYER};
//!
//! let image = image::open("sample.png").unwrap();
//! if let Some(overlay) = grad_cam(&image, TARGET_LAYER) {
//!     overlay.save("overlay.png").unwrap();
//! }
//! ```

pub mod error;
pub mod gradcam;
pub mod ml;
pub mod model;
pub mod runtime;

pub use error::{GradCamError, Result};
pub use gradcam::{compute_gradcam, generate, grad_cam, grad_cam_with_config, GradCamOutput, Heatmap};
pub use ml::{Classifier, ClassifierConfig, LayerInfo, LayerKind, LayeredClassifier, ModelProvider, TARGET_LAYER};
pub use model::{AppConfig, DeviceType, ModelSettings, OverlaySettings};
