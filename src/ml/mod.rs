pub mod layers;
pub mod ml_model;
pub mod provider;

pub use layers::{LayerInfo, LayerKind, LayeredClassifier};
pub use ml_model::{Classifier, ClassifierConfig, ConvBlockConfig, ConvMlpRecord, NUM_CLASSES, IMAGE_SIZE, TARGET_LAYER};
pub use provider::{ModelProvider, save_classifier};
