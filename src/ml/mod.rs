pub mod ml_model;
pub mod training;
pub mod inference;
pub mod export;

pub use ml_model::{LesionClassifier, ConvBackbone, ModelConfig, NUM_CLASSES, IMAGE_SIZE, load_rgb, normalize_image, load_and_normalize_image_with_size};
pub use training::{LesionDataset, LesionBatcher, Augmentation, TrainingJob, TrainedModel, build_model, fit, train_model, load_classifier, model_to_bytes};
pub use inference::{InferenceEngine, Prediction};
pub use export::export_model;
