//! 統合分類用CNNモデルと画像前処理
//!
//! 任意サイズのRGB画像を130クラスの統合ラベル空間に分類するモデルを
//! 提供します。前処理（リサイズ + 正規化）は学習・推論で共通です。

use anyhow::{Context, Result};
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
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, RgbImage};

/// モデル入力の画像サイズ（32x32）
pub const IMAGE_SIZE: usize = 32;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率（推論時は0.0）
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 32)]
    pub image_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> UnifiedClassifier<B> {
        // サイズ計算:
        // Conv1 (3x3, no padding): size -> size - 2
        // Pool1 (2x2): (size - 2) / 2 (切り捨て)
        // Conv2 (3x3, no padding): -> -2
        // Pool2 (2x2): / 2
        // Conv3 (3x3, no padding): -> -2
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        let feature_map_size = after_pool2.saturating_sub(2);

        if feature_map_size == 0 {
            panic!(
                "入力サイズが小さすぎます: {} (最小14x14が必要)",
                self.image_size
            );
        }

        // 特徴次元 d = 128チャネル * feature_map_size^2（32x32入力なら2048）
        let d = 128 * feature_map_size * feature_map_size;
        let d_half = d / 2;

        UnifiedClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).init(),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).init(),
            conv3: Conv2dConfig::new([64, 128], [3, 3])
                .with_stride([1, 1])
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(d, d_half).init(device),
            fc2: LinearConfig::new(d_half, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 統合分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding, stride 1) + ReLU} x 3層（途中2回の2x2 Max Pooling）
/// - Dropout
/// - Flatten
/// - FC: d -> d/2 + ReLU
/// - FC: d/2 -> num_classes（1クラス1ロジット）
///
/// Softmaxは推論側で適用する。
#[derive(Module, Debug)]
pub struct UnifiedClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d, // 2x2
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d, // 2x2
    conv3: Conv2d<B>, // 64 -> 128

    dropout: Dropout,

    // 全結合層
    fc1: Linear<B>, // d -> d/2
    fc2: Linear<B>, // d/2 -> num_classes

    activation: Relu,
}

impl<B: Backend> UnifiedClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let x = self.dropout.forward(x);

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
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
}

/// 画像バイト列をデコードしてRGBに変換
pub fn decode_rgb_image(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes).context("画像のデコードに失敗しました")?;
    Ok(img.to_rgb8())
}

/// RGB画像を前処理してモデル入力用のデータに変換
///
/// 任意解像度の入力を `size` x `size` にリサイズし、各チャネルを
/// (x/255 - 0.5) / 0.5 で [-1, 1] に正規化する。
/// (C, H, W) の順で平坦化したf32ベクトルを返す。
pub fn preprocess_image(img: &RgbImage, size: usize) -> Vec<f32> {
    let resized = if img.width() as usize == size && img.height() as usize == size {
        img.clone()
    } else {
        image::imageops::resize(img, size as u32, size as u32, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * size * size);
    for channel in 0..3 {
        for y in 0..size as u32 {
            for x in 0..size as u32 {
                let value = resized.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - 0.5) / 0.5);
            }
        }
    }
    data
}

/// 画像ファイルを読み込んで前処理（学習データ読み込み用）
pub fn load_and_normalize_image(path: &Path, size: usize) -> Result<Vec<f32>> {
    let img = image::open(path)
        .with_context(|| format!("画像の読み込みに失敗しました: {}", path.display()))?
        .to_rgb8();
    Ok(preprocess_image(&img, size))
}
