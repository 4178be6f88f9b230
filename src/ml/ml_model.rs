//! 機械学習モデルの共通定義
//!
//! 皮膚病変の良性/悪性を分類するCNNモデルと関連する設定を提供します。

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, RgbImage};
use tracing::debug;

use crate::dicom::decode_to_raster;
use crate::error::{self, PipelineError};
use crate::types::Diagnosis;

/// クラス数（benign / malignant）
pub const NUM_CLASSES: usize = Diagnosis::ALL.len();

/// 画像サイズ
pub const IMAGE_SIZE: usize = 224;

/// 畳み込み層のチャネル数
const CHANNELS: [usize; 5] = [3, 32, 64, 128, 256];

/// 全結合層の隠れユニット数
const HIDDEN_UNITS: usize = 512;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.2)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 畳み込み4段後の特徴マップの一辺
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2): size -> size / 2 (切り捨て)
    pub fn feature_map_size(&self) -> usize {
        let mut size = self.image_size;
        for _ in 0..4 {
            size = size.saturating_sub(2) / 2;
        }
        size
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<LesionClassifier<B>> {
        let feature_map_size = self.feature_map_size();
        if feature_map_size == 0 {
            return Err(PipelineError::Config(format!(
                "input size {} is too small for the convolution stack",
                self.image_size
            )));
        }

        // 特徴次元 d = 256チャネル * feature_map_size * feature_map_size
        let d = CHANNELS[4] * feature_map_size * feature_map_size;

        debug!("[Model] 入力サイズ: {}x{}", self.image_size, self.image_size);
        debug!("[Model] Conv4後: 256 x {}x{}", feature_map_size, feature_map_size);
        debug!("[Model] FC1: {} -> {}", d, HIDDEN_UNITS);
        debug!("[Model] FC2: {} -> {}", HIDDEN_UNITS, self.num_classes);

        Ok(LesionClassifier {
            backbone: ConvBackbone::new(device),
            fc1: LinearConfig::new(d, HIDDEN_UNITS).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(HIDDEN_UNITS, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 畳み込み特徴抽出部
///
/// {Conv 3x3 (no padding) + ReLU + MaxPool 2x2} x 4層、チャネルは 32/64/128/256。
#[derive(Module, Debug)]
pub struct ConvBackbone<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> ConvBackbone<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv = |i: usize| {
            Conv2dConfig::new([CHANNELS[i], CHANNELS[i + 1]], [3, 3])
                .with_stride([1, 1])
                .init(device)
        };

        Self {
            conv1: conv(0),
            conv2: conv(1),
            conv3: conv(2),
            conv4: conv(3),
            pool: MaxPool2dConfig::new([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    /// [batch, 3, size, size] -> [batch, 256, f, f]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for conv in [&self.conv1, &self.conv2, &self.conv3, &self.conv4] {
            x = conv.forward(x);
            x = self.activation.forward(x);
            x = self.pool.forward(x);
        }
        x
    }
}

/// 病変分類用CNNモデル
///
/// # アーキテクチャ
/// - ConvBackbone
/// - Flatten
/// - FC: d -> 512 + ReLU
/// - Dropout
/// - FC: 512 -> num_classes
#[derive(Module, Debug)]
pub struct LesionClassifier<B: Backend> {
    backbone: ConvBackbone<B>,
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> LesionClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.backbone.forward(images);

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 特徴抽出部を差し替える（転移学習用）
    pub fn with_backbone(mut self, backbone: ConvBackbone<B>) -> Self {
        self.backbone = backbone;
        self
    }

    /// 特徴抽出部の勾配計算を止め、分類ヘッドだけを学習対象にする
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }

    pub fn into_backbone(self) -> ConvBackbone<B> {
        self.backbone
    }
}

/// 画像を読み込んでRGBにする。`.dcm` はDICOMとしてデコードする
pub fn load_rgb(path: &Path) -> error::Result<RgbImage> {
    let is_dicom = path
        .extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("dcm"))
        .unwrap_or(false);

    if is_dicom {
        return Ok(decode_to_raster(path)?.to_rgb8());
    }

    let img = image::open(path).map_err(|e| PipelineError::decode(path, e.to_string()))?;
    Ok(img.to_rgb8())
}

/// RGB画像を指定サイズにリサイズし、1/255で正規化して (C, H, W) の順で平坦化
pub fn normalize_image(img: &RgbImage, size: usize) -> Vec<f32> {
    let resized = if img.dimensions() == (size as u32, size as u32) {
        img.clone()
    } else {
        image::imageops::resize(img, size as u32, size as u32, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * size * size);
    for channel in 0..3 {
        for pixel in resized.pixels() {
            data.push(pixel[channel] as f32 / 255.0);
        }
    }
    data
}

/// 画像を読み込んで正規化（サイズ指定版）
pub fn load_and_normalize_image_with_size(path: &Path, size: usize) -> error::Result<Vec<f32>> {
    let img = load_rgb(path)?;
    Ok(normalize_image(&img, size))
}
