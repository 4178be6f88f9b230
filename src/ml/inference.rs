//! モデル推論機能

use std::path::Path;

use burn::{
    backend::Wgpu,
    tensor::{backend::Backend, Tensor},
};

use crate::error::{PipelineError, Result};
use crate::ml::{load_and_normalize_image_with_size, load_classifier, LesionClassifier};
use crate::model::ModelMetadata;
use crate::types::Diagnosis;

/// 1枚の画像に対する推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Diagnosis,
    /// 悪性クラスの確率 (0.0 - 1.0)
    pub malignant_probability: f32,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend = Wgpu> {
    model: LesionClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl InferenceEngine<Wgpu> {
    /// モデルを読み込んで推論エンジンを初期化（WGPU 既定デバイス）
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::load_on(model_path, Default::default())
    }
}

impl<B: Backend> InferenceEngine<B> {
    pub fn load_on<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_classifier::<B>(model_path.as_ref(), &device)?;
        Ok(Self {
            model,
            metadata,
            device,
        })
    }

    pub fn from_model(model: LesionClassifier<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model,
            metadata,
            device,
        }
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let size = self.metadata.image_size;
        let image_data = load_and_normalize_image_with_size(image_path.as_ref(), size)?;

        // [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, size, size]);

        let probs = self
            .model
            .probabilities(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PipelineError::Training(format!("failed to read inference output: {:?}", e)))?;

        let (class_idx, _) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .ok_or_else(|| PipelineError::Training("model produced no outputs".into()))?;

        let label_name = self.metadata.class_index_to_label(class_idx).ok_or_else(|| {
            PipelineError::Training(format!("class index {} is out of range", class_idx))
        })?;
        let label = Diagnosis::from_label(label_name).ok_or_else(|| {
            PipelineError::Training(format!("unknown class label '{}' in metadata", label_name))
        })?;

        let malignant_probability = probs
            .get(Diagnosis::Malignant.class_id())
            .copied()
            .unwrap_or(0.0);

        Ok(Prediction {
            label,
            malignant_probability,
        })
    }

    /// 複数画像をバッチ分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        image_paths.iter().map(|path| self.classify_image(path)).collect()
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
