//! モデル学習
//!
//! 学習用・検証用ディレクトリ（それぞれ benign/ と malignant/ を持つ）から
//! 画像を読み込み、エポックごとの精度と損失を記録しながら学習します。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burn::{
    data::{dataloader::batcher::Batcher, dataloader::DataLoaderBuilder, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, HalfPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        activation::softmax,
        ElementConversion, Int, Tensor,
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use burn_autodiff::Autodiff;
use burn_wgpu::{Wgpu, WgpuDevice};
use image::{imageops::FilterType, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{info, warn};

use crate::dataset::layout::list_files;
use crate::error::{PipelineError, Result};
use crate::metrics_report::{EpochMetrics, EpochTally, MetricHistory};
use crate::ml::{load_rgb, normalize_image, LesionClassifier, ModelConfig, NUM_CLASSES};
use crate::model::{load_model_with_metadata, DeviceType, ModelArchitecture, ModelMetadata, ModelSettings, TrainingSettings, WeightPrecision};
use crate::types::Diagnosis;

/// 学習に使う画像の拡張子
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "dcm"];

/// 学習データセット（パスのリストのみ保持）
pub struct LesionDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
}

impl LesionDataset {
    /// `<data_dir>/benign` と `<data_dir>/malignant` から画像を集める
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        let mut samples = Vec::new();

        for diagnosis in Diagnosis::ALL {
            let class_dir = data_dir.join(diagnosis.dir_name());
            if !class_dir.exists() {
                warn!("クラスディレクトリが存在しません: {}", class_dir.display());
                continue;
            }

            for path in list_files(&class_dir)? {
                let is_image = path
                    .extension()
                    .map(|ext| {
                        let ext = ext.to_string_lossy().to_lowercase();
                        IMAGE_EXTENSIONS.contains(&ext.as_str())
                    })
                    .unwrap_or(false);
                if is_image {
                    samples.push((path, diagnosis.class_id()));
                }
            }
        }

        Ok(Self { samples })
    }

    /// 全サンプルを一度読み込み、読めないファイルがあればそのパスを含むエラーを返す
    pub fn verify(&self) -> Result<()> {
        for (path, _) in &self.samples {
            load_rgb(path)?;
        }
        Ok(())
    }

    pub fn class_count(&self, diagnosis: Diagnosis) -> usize {
        self.samples
            .iter()
            .filter(|(_, id)| *id == diagnosis.class_id())
            .count()
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct LesionItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<LesionItem> for LesionDataset {
    fn get(&self, index: usize) -> Option<LesionItem> {
        let (path, label) = self.samples.get(index)?;
        Some(LesionItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// 学習時のデータ拡張
///
/// 回転・せん断、ランダムな位置・倍率での切り出し（シフト + ズーム）、左右反転を行う。
#[derive(Clone, Debug)]
pub struct Augmentation {
    /// 回転角の範囲（度、±）
    pub rotation_degrees: f32,
    /// せん断角の範囲（度、±）
    pub shear_degrees: f32,
    /// 切り出し範囲の最小倍率（0.8なら最大20%ズーム）
    pub min_crop_scale: f32,
    pub horizontal_flip: bool,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            rotation_degrees: 40.0,
            shear_degrees: 0.2,
            min_crop_scale: 0.8,
            horizontal_flip: true,
        }
    }
}

/// 画像中心まわりの回転 + せん断
///
/// 出力画素ごとに元画像の座標を逆算して双線形補間する。範囲外は端の画素で埋める。
pub fn rotate_and_shear(img: &RgbImage, rotation_degrees: f32, shear_degrees: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let (sin_r, cos_r) = rotation_degrees.to_radians().sin_cos();
    let (sin_s, cos_s) = shear_degrees.to_radians().sin_cos();
    // 回転行列 × せん断行列
    let m00 = cos_r;
    let m01 = -cos_r * sin_s - sin_r * cos_s;
    let m10 = sin_r;
    let m11 = -sin_r * sin_s + cos_r * cos_s;

    let cx = (width - 1) as f32 / 2.0;
    let cy = (height - 1) as f32 / 2.0;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = (m00 * dx + m01 * dy + cx).clamp(0.0, max_x);
        let sy = (m10 * dx + m11 * dy + cy).clamp(0.0, max_y);
        image::imageops::interpolate_bilinear(img, sx, sy)
            .unwrap_or_else(|| *img.get_pixel(sx.round() as u32, sy.round() as u32))
    })
}

impl Augmentation {
    pub fn apply<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let (width, height) = img.dimensions();

        let rotation = if self.rotation_degrees > 0.0 {
            rng.gen_range(-self.rotation_degrees..=self.rotation_degrees)
        } else {
            0.0
        };
        let shear = if self.shear_degrees > 0.0 {
            rng.gen_range(-self.shear_degrees..=self.shear_degrees)
        } else {
            0.0
        };
        let img = if rotation != 0.0 || shear != 0.0 {
            rotate_and_shear(img, rotation, shear)
        } else {
            img.clone()
        };

        let scale = rng.gen_range(self.min_crop_scale.min(1.0)..=1.0);
        let crop_w = ((width as f32 * scale) as u32).clamp(1, width);
        let crop_h = ((height as f32 * scale) as u32).clamp(1, height);
        let x = rng.gen_range(0..=width - crop_w);
        let y = rng.gen_range(0..=height - crop_h);

        let cropped = image::imageops::crop_imm(&img, x, y, crop_w, crop_h).to_image();
        let mut out = image::imageops::resize(&cropped, width, height, FilterType::Triangle);

        if self.horizontal_flip && rng.gen_bool(0.5) {
            image::imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }
}

/// バッチャー
#[derive(Clone)]
pub struct LesionBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    augmentation: Option<(Augmentation, Arc<Mutex<StdRng>>)>,
}

impl<B: Backend> LesionBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self {
            device,
            image_size,
            augmentation: None,
        }
    }

    pub fn with_augmentation(mut self, augmentation: Augmentation, seed: u64) -> Self {
        self.augmentation = Some((augmentation, Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))));
        self
    }

    fn load_item(&self, item: &LesionItem) -> Result<Vec<f32>> {
        let img = load_rgb(&item.path)?;
        let img = match &self.augmentation {
            Some((augmentation, rng)) => {
                let mut rng = rng
                    .lock()
                    .map_err(|_| PipelineError::Training("augmentation rng poisoned".into()))?;
                augmentation.apply(&img, &mut *rng)
            }
            None => img,
        };
        Ok(normalize_image(&img, self.image_size))
    }
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher<B> {
    fn batch(&self, items: Vec<LesionItem>, _device: &B::Device) -> LesionBatch<B> {
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(items.len() * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(items.len());

        for item in items {
            match self.load_item(&item) {
                Ok(image_data) => {
                    all_pixels.extend_from_slice(&image_data);
                    targets_vec.push(item.label as i64);
                }
                // 読めなかった画像はラベルごとバッチから外す
                Err(e) => warn!("画像読み込み失敗のため除外 {}: {}", item.path.display(), e),
            }
        }
        let batch_size = targets_vec.len();

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        LesionBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<LesionBatch<B>, ClassificationOutput<B>> for LesionClassifier<B> {
    fn step(&self, batch: LesionBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<LesionBatch<B>, ClassificationOutput<B>> for LesionClassifier<B> {
    fn step(&self, batch: LesionBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 出力テンソルを取り出して1エポック分の集計に加える
fn record_output<B: Backend>(tally: &mut EpochTally, item: &ClassificationOutput<B>) {
    let [batch_size] = item.targets.dims();
    if batch_size == 0 {
        return;
    }
    let positive = Diagnosis::Malignant.class_id();

    tally.record_loss(item.loss.clone().into_scalar().elem::<f64>(), batch_size);

    let probabilities: Vec<f64> = softmax(item.output.clone(), 1)
        .into_data()
        .iter::<f64>()
        .collect();
    let targets: Vec<i64> = item.targets.clone().into_data().iter::<i64>().collect();

    for (row, target) in probabilities.chunks(NUM_CLASSES).zip(targets) {
        let predicted = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(class, _)| class)
            .unwrap_or(0);
        tally.record_sample(row[positive], predicted == positive, target as usize == positive);
    }
}

/// 学習ジョブ
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub training_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub model: ModelSettings,
    pub training: TrainingSettings,
    pub device_type: DeviceType,
}

/// 学習済みモデルと指標の履歴
pub struct TrainedModel<B: Backend> {
    pub model: LesionClassifier<B>,
    pub history: MetricHistory,
}

/// バンドルから分類器を復元する
pub fn load_classifier<B: Backend>(
    bundle_path: &Path,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, ModelMetadata)> {
    let (metadata, model_binary) = load_model_with_metadata(bundle_path)?;

    let model = ModelConfig::new(metadata.num_classes())
        .with_dropout(0.0) // 推論時はドロップアウトなし
        .with_image_size(metadata.image_size)
        .init::<B>(device)?;

    let record_err =
        |e| PipelineError::format(bundle_path, format!("failed to load model weights: {:?}", e));

    let record: <LesionClassifier<B> as Module<B>>::Record = match metadata.precision {
        WeightPrecision::Full => BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, device)
            .map_err(record_err)?,
        WeightPrecision::Half => BinBytesRecorder::<HalfPrecisionSettings>::default()
            .load(model_binary, device)
            .map_err(record_err)?,
    };

    Ok((model.load_record(record), metadata))
}

/// 設定に従ってモデルを構築する。Transfer の場合は学習済みの特徴抽出部を読み込んで凍結する
pub fn build_model<B: Backend>(settings: &ModelSettings, device: &B::Device) -> Result<LesionClassifier<B>> {
    let model = ModelConfig::new(NUM_CLASSES)
        .with_dropout(settings.dropout)
        .with_image_size(settings.image_size)
        .init::<B>(device)?;

    match settings.architecture {
        ModelArchitecture::Scratch => Ok(model),
        ModelArchitecture::Transfer => {
            let path = settings.pretrained_path.as_ref().ok_or_else(|| {
                PipelineError::Config("model.pretrained_path is required for transfer learning".into())
            })?;
            let (pretrained, metadata) = load_classifier::<B>(path, device)?;
            info!(
                "学習済みの特徴抽出部を読み込みました: {} ({})",
                path.display(),
                metadata.trained_at
            );
            Ok(model.with_backbone(pretrained.into_backbone()).freeze_backbone())
        }
    }
}

/// 任意のバックエンドで学習を実行する
pub fn fit<B: AutodiffBackend>(job: &TrainingJob, device: B::Device) -> Result<TrainedModel<B::InnerBackend>> {
    let dataset_train = LesionDataset::from_directory(&job.training_dir)?;
    let dataset_valid = LesionDataset::from_directory(&job.validation_dir)?;

    for diagnosis in Diagnosis::ALL {
        info!(
            "  クラス '{}': 学習 {} 枚, 検証 {} 枚",
            diagnosis,
            dataset_train.class_count(diagnosis),
            dataset_valid.class_count(diagnosis)
        );
    }

    if dataset_train.is_empty() {
        return Err(PipelineError::Training(format!(
            "no training images found in {}",
            job.training_dir.display()
        )));
    }

    // 読めない画像があれば学習を始める前に止める
    dataset_train.verify()?;
    dataset_valid.verify()?;

    let settings = &job.training;
    let image_size = job.model.image_size;

    let batcher_train = LesionBatcher::<B>::new(device.clone(), image_size)
        .with_augmentation(Augmentation::default(), settings.seed);
    let batcher_valid = LesionBatcher::<B::InnerBackend>::new(device.clone(), image_size);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(0)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(settings.batch_size)
        .num_workers(0)
        .build(dataset_valid);

    let mut model = build_model::<B>(&job.model, &device)?;
    let mut optim = AdamConfig::new().init::<B, LesionClassifier<B>>();

    info!(
        "学習を開始します: エポック数 {}, バッチサイズ {}, 学習率 {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let mut history = MetricHistory::default();

    for epoch in 1..=settings.num_epochs {
        let mut train = EpochTally::default();
        for batch in dataloader_train.iter() {
            let output = TrainStep::step(&model, batch);
            record_output(&mut train, &output.item);
            model = optim.step(settings.learning_rate, model, output.grads);
        }

        let model_valid = model.valid();
        let mut valid = EpochTally::default();
        for batch in dataloader_valid.iter() {
            let output = ValidStep::step(&model_valid, batch);
            record_output(&mut valid, &output);
        }

        let metrics = EpochMetrics::from_tallies(epoch, &train, &valid);
        info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - precision: {:.4} - recall: {:.4} - auc: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} - val_precision: {:.4} - val_recall: {:.4} - val_auc: {:.4}",
            epoch,
            settings.num_epochs,
            metrics.loss,
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.auc,
            metrics.val_loss,
            metrics.val_accuracy,
            metrics.val_precision,
            metrics.val_recall,
            metrics.val_auc
        );
        history.push(metrics);

        if train.accuracy() > settings.target_accuracy {
            info!(
                "学習精度が {:.0}% を超えたため学習を打ち切ります",
                settings.target_accuracy * 100.0
            );
            break;
        }
    }

    Ok(TrainedModel {
        model: model.valid(),
        history,
    })
}

/// モデル学習を実行（WGPU バックエンド）
pub fn train_model(job: &TrainingJob) -> Result<TrainedModel<Wgpu>> {
    let device = match job.device_type {
        DeviceType::Wgpu => WgpuDevice::DiscreteGpu(0),
        DeviceType::Cpu => WgpuDevice::Cpu,
    };
    info!("使用デバイス: {:?}", device);

    fit::<Autodiff<Wgpu>>(job, device)
}

/// 学習済みモデルを重みのバイト列にする
pub fn model_to_bytes<B: Backend>(model: LesionClassifier<B>, precision: WeightPrecision) -> Result<Vec<u8>> {
    let record = model.into_record();
    let bytes = match precision {
        WeightPrecision::Full => BinBytesRecorder::<FullPrecisionSettings>::default().record(record, ()),
        WeightPrecision::Half => BinBytesRecorder::<HalfPrecisionSettings>::default().record(record, ()),
    };
    bytes.map_err(|e| PipelineError::Export(format!("failed to serialize model weights: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use std::fs;

    fn write_image(path: &Path, shade: u8) {
        let img = RgbImage::from_pixel(52, 52, image::Rgb([shade, shade / 2, 255 - shade]));
        img.save(path).unwrap();
    }

    fn dataset_dirs(root: &Path) -> (PathBuf, PathBuf) {
        let training = root.join("training");
        let validation = root.join("validation");
        for base in [&training, &validation] {
            for diagnosis in Diagnosis::ALL {
                fs::create_dir_all(base.join(diagnosis.dir_name())).unwrap();
            }
        }
        for i in 0..3u8 {
            write_image(&training.join("benign").join(format!("b{}.png", i)), 20 + i);
            write_image(&training.join("malignant").join(format!("m{}.png", i)), 200 + i);
        }
        write_image(&validation.join("benign").join("b.png"), 30);
        write_image(&validation.join("malignant").join("m.png"), 210);
        fs::write(training.join("benign").join("notes.txt"), b"not an image").unwrap();
        (training, validation)
    }

    #[test]
    fn test_dataset_discovery() {
        let root = tempfile::tempdir().unwrap();
        let (training, _) = dataset_dirs(root.path());

        let dataset = LesionDataset::from_directory(&training).unwrap();
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.class_count(Diagnosis::Benign), 3);
        let item = dataset.get(0).unwrap();
        assert_eq!(item.label, Diagnosis::Benign.class_id());
        assert!(dataset.get(6).is_none());
    }

    #[test]
    fn test_augmentation_keeps_size() {
        let img = RgbImage::from_pixel(40, 30, image::Rgb([1, 2, 3]));
        let mut rng = StdRng::seed_from_u64(0);
        let out = Augmentation::default().apply(&img, &mut rng);
        assert_eq!(out.dimensions(), (40, 30));
    }

    #[test]
    fn test_augmentation_without_transforms_is_identity() {
        let img = RgbImage::from_fn(9, 7, |x, y| image::Rgb([(x * 20) as u8, (y * 30) as u8, 7]));
        let augmentation = Augmentation {
            rotation_degrees: 0.0,
            shear_degrees: 0.0,
            min_crop_scale: 1.0,
            horizontal_flip: false,
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(augmentation.apply(&img, &mut rng), img);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let img = RgbImage::from_fn(3, 3, |x, y| image::Rgb([(x * 3 + y) as u8 * 20, 0, 0]));
        let out = rotate_and_shear(&img, 90.0, 0.0);
        assert_eq!(out.dimensions(), (3, 3));
        // 中心は動かない
        assert_eq!(out.get_pixel(1, 1), img.get_pixel(1, 1));
        // 出力 (2,1) は元の (1,2) から取る
        let got = out.get_pixel(2, 1)[0] as i32;
        let want = img.get_pixel(1, 2)[0] as i32;
        assert!((got - want).abs() <= 1, "got {} want {}", got, want);
    }

    #[test]
    fn test_shear_keeps_size_and_fills_edges() {
        let img = RgbImage::from_pixel(20, 10, image::Rgb([50, 60, 70]));
        let out = rotate_and_shear(&img, 40.0, 0.2);
        assert_eq!(out.dimensions(), (20, 10));
        // 端の画素で埋めるので黒い隙間はできない
        assert!(out.pixels().all(|p| *p == image::Rgb([50, 60, 70])));
    }

    #[test]
    fn test_batcher_drops_unreadable_item_with_its_label() {
        let device = NdArrayDevice::Cpu;
        let root = tempfile::tempdir().unwrap();
        let (training, _) = dataset_dirs(root.path());

        let batcher = LesionBatcher::<NdArray>::new(device.clone(), 48);
        let items = vec![
            LesionItem { path: training.join("benign/b0.png"), label: 0 },
            LesionItem { path: training.join("malignant/missing.png"), label: 1 },
            LesionItem { path: training.join("malignant/m0.png"), label: 1 },
        ];
        let batch = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 48, 48]);
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![0, 1]);
    }

    #[test]
    fn test_fit_rejects_unreadable_image() {
        let root = tempfile::tempdir().unwrap();
        let (training, validation) = dataset_dirs(root.path());
        let broken = training.join("malignant").join("ISIC_0000666.dcm");
        fs::write(&broken, b"not a dicom file").unwrap();

        let job = job_for(root.path(), training, validation);
        let err = fit::<Autodiff<NdArray>>(&job, NdArrayDevice::Cpu).err().unwrap();
        assert!(err.to_string().contains("ISIC_0000666.dcm"), "{}", err);
    }

    #[test]
    fn test_verify_accepts_readable_dataset() {
        let root = tempfile::tempdir().unwrap();
        let (training, validation) = dataset_dirs(root.path());
        LesionDataset::from_directory(&training).unwrap().verify().unwrap();
        LesionDataset::from_directory(&validation).unwrap().verify().unwrap();
    }

    fn job_for(root: &Path, training: PathBuf, validation: PathBuf) -> TrainingJob {
        TrainingJob {
            training_dir: training,
            validation_dir: validation,
            model: ModelSettings {
                architecture: ModelArchitecture::Scratch,
                pretrained_path: None,
                dropout: 0.2,
                image_size: 48,
            },
            training: TrainingSettings {
                num_epochs: 2,
                batch_size: 4,
                learning_rate: 1e-3,
                seed: 1,
                // 早期終了させない
                target_accuracy: 1.1,
                history_csv: root.join("history.csv"),
            },
            device_type: DeviceType::Cpu,
        }
    }

    #[test]
    fn test_fit_records_history() {
        let root = tempfile::tempdir().unwrap();
        let (training, validation) = dataset_dirs(root.path());
        let job = job_for(root.path(), training, validation);

        let trained = fit::<Autodiff<NdArray>>(&job, NdArrayDevice::Cpu).unwrap();
        assert_eq!(trained.history.len(), 2);
        for metrics in trained.history.epochs() {
            for value in [
                metrics.accuracy,
                metrics.val_accuracy,
                metrics.precision,
                metrics.val_precision,
                metrics.recall,
                metrics.val_recall,
                metrics.auc,
                metrics.val_auc,
            ] {
                assert!((0.0..=1.0).contains(&value), "{:?}", metrics);
            }
            assert!(metrics.loss.is_finite());
        }
    }

    #[test]
    fn test_record_output_counts_malignant_as_positive() {
        let device = NdArrayDevice::Cpu;
        // 行ごとに (benign, malignant) のロジット
        let output = Tensor::<NdArray, 2>::from_floats([[2.0, 0.0], [0.0, 3.0], [0.0, 1.0]], &device);
        let targets = Tensor::<NdArray, 1, Int>::from_ints([0, 1, 0], &device);
        let item = ClassificationOutput::new(Tensor::<NdArray, 1>::from_floats([0.5], &device), output, targets);

        let mut tally = EpochTally::default();
        record_output(&mut tally, &item);
        assert_eq!(tally.count(), 3);
        assert!((tally.accuracy() - 2.0 / 3.0).abs() < 1e-9);
        assert!((tally.precision() - 0.5).abs() < 1e-9);
        assert!((tally.recall() - 1.0).abs() < 1e-9);
        assert!((tally.auc() - 1.0).abs() < 1e-9);
        assert!((tally.loss() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_transfer_requires_pretrained_path() {
        let settings = ModelSettings {
            architecture: ModelArchitecture::Transfer,
            pretrained_path: None,
            dropout: 0.2,
            image_size: 48,
        };
        let result = build_model::<NdArray>(&settings, &NdArrayDevice::Cpu);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_weights_round_trip_through_bundle() {
        use crate::model::{compression_for, save_model_with_metadata, OptimizationMode};

        let device = NdArrayDevice::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let model = ModelConfig::new(NUM_CLASSES)
            .with_image_size(48)
            .init::<NdArray>(&device)
            .unwrap();
        let images = Tensor::<NdArray, 4>::ones([1, 3, 48, 48], &device);
        let expected = model.forward(images.clone()).into_data().to_vec::<f32>().unwrap();

        let metadata = ModelMetadata::new(ModelArchitecture::Scratch, 48, 1, OptimizationMode::Latency, None);
        let bytes = model_to_bytes(model, metadata.precision).unwrap();
        let path = save_model_with_metadata(
            &dir.path().join("model.tar.gz"),
            &metadata,
            &bytes,
            compression_for(metadata.optimization),
        )
        .unwrap();

        let (restored, restored_meta) = load_classifier::<NdArray>(&path, &device).unwrap();
        assert_eq!(restored_meta.image_size, 48);
        let actual = restored.forward(images).into_data().to_vec::<f32>().unwrap();
        for (a, b) in actual.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_transfer_loads_backbone() {
        use crate::model::{compression_for, save_model_with_metadata, OptimizationMode};

        let device = NdArrayDevice::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let pretrained = ModelConfig::new(NUM_CLASSES)
            .with_image_size(48)
            .init::<NdArray>(&device)
            .unwrap();
        let metadata = ModelMetadata::new(ModelArchitecture::Scratch, 48, 1, OptimizationMode::Default, None);
        let path = save_model_with_metadata(
            &dir.path().join("pretrained.tar.gz"),
            &metadata,
            &model_to_bytes(pretrained, metadata.precision).unwrap(),
            compression_for(metadata.optimization),
        )
        .unwrap();

        // 入力サイズが違っても特徴抽出部は流用できる
        let settings = ModelSettings {
            architecture: ModelArchitecture::Transfer,
            pretrained_path: Some(path),
            dropout: 0.2,
            image_size: 64,
        };
        let model = build_model::<NdArray>(&settings, &device).unwrap();
        let out = model.forward(Tensor::<NdArray, 4>::zeros([2, 3, 64, 64], &device));
        assert_eq!(out.dims(), [2, NUM_CLASSES]);
    }
}
