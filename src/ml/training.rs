//! 統合データセットでのモデル学習
//!
//! 4つのデータセットをラベルリマップで1つのラベル空間に統合し、
//! 固定エポック数の教師あり学習を実行します。
//!
//! データレイアウト（データセットの取得・展開は本リポジトリの対象外）:
//!
//! ```text
//! data/
//!   cifar10/{train,test}/<クラス名>/*.png
//!   cifar100/{train,test}/<クラス名>/*.png
//!   mnist/{train,test}/<クラス名>/*.png
//!   fashion_mnist/{train,test}/<クラス名>/*.png
//! ```
//!
//! クラス名ディレクトリはラベルテーブルのネイティブ順序で解釈されます。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::labels::{self, NUM_CLASSES};
use crate::ml::ml_model::{load_and_normalize_image, ModelConfig};
use crate::ml::{select_device, TrainBackend, UnifiedClassifier, IMAGE_SIZE};
use crate::model::{save_model_with_metadata, AppConfig, ModelMetadata};

/// データセットアイテム
///
/// `label` はリマップ済みの統合ラベル（[0, 130)）。
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

/// クラスディレクトリから画像サンプルを収集
///
/// `classes` の順序がネイティブラベルを決める。存在しないクラス
/// ディレクトリはスキップする（厳密な検証はtrain_model側で行う）。
fn collect_samples(dataset_dir: &Path, classes: &[&str]) -> Result<Vec<(PathBuf, usize)>> {
    let mut samples = Vec::new();

    for (native_label, class_name) in classes.iter().enumerate() {
        let class_dir = dataset_dir.join(class_name);
        if !class_dir.exists() {
            continue;
        }

        for entry in std::fs::read_dir(&class_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension() {
                    let ext_str = ext.to_string_lossy().to_lowercase();
                    if ext_str == "png" || ext_str == "jpg" || ext_str == "jpeg" {
                        samples.push((path, native_label));
                    }
                }
            }
        }
    }

    Ok(samples)
}

/// 4データセットを統合したデータセット
///
/// 各データセットのネイティブラベルはブロックのオフセットでリマップ済み。
pub struct CombinedDataset {
    samples: Vec<ImageItem>,
}

impl CombinedDataset {
    /// データルートから指定splitの統合データセットを読み込む
    ///
    /// splitは "train" または "test"。データセットディレクトリ自体が
    /// 存在しない場合はエラー。
    pub fn load(data_root: &Path, split: &str) -> Result<Self> {
        let mut samples = Vec::new();

        for block in &labels::DATASET_BLOCKS {
            let dataset_dir = data_root.join(block.dataset).join(split);
            if !dataset_dir.is_dir() {
                anyhow::bail!(
                    "データセットディレクトリが存在しません: {}",
                    dataset_dir.display()
                );
            }

            let native_samples = collect_samples(&dataset_dir, block.classes)?;
            for (path, native_label) in native_samples {
                samples.push(ImageItem {
                    path,
                    label: labels::remap_label(native_label, block)?,
                });
            }
        }

        if samples.is_empty() {
            anyhow::bail!("学習データが見つかりません: {}", data_root.display());
        }

        Ok(Self { samples })
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }
}

impl Dataset<ImageItem> for CombinedDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
#[derive(Clone)]
pub struct ClassifierBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> ClassifierBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ClassifierBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, ImageItem, ClassifierBatch<B>> for ClassifierBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ClassifierBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            // 画像をロードして正規化（CPUメモリ上）
            match load_and_normalize_image(&item.path, size) {
                Ok(image_data) => {
                    all_pixels.extend_from_slice(&image_data);
                }
                Err(e) => {
                    eprintln!("警告: 画像読み込み失敗 {}: {}", item.path.display(), e);
                    // エラーの場合はゼロで埋める
                    all_pixels.extend(vec![0.0f32; 3 * size * size]);
                }
            }
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスメモリへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ClassifierBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: burn::tensor::backend::AutodiffBackend>
    burn::train::TrainStep<ClassifierBatch<B>, burn::train::ClassificationOutput<B>>
    for UnifiedClassifier<B>
{
    fn step(
        &self,
        batch: ClassifierBatch<B>,
    ) -> burn::train::TrainOutput<burn::train::ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        burn::train::TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> burn::train::ValidStep<ClassifierBatch<B>, burn::train::ClassificationOutput<B>>
    for UnifiedClassifier<B>
{
    fn step(&self, batch: ClassifierBatch<B>) -> burn::train::ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習データレイアウトの事前検証
///
/// 各データセットの全クラスディレクトリに画像が1枚以上あることを確認する。
fn validate_data_layout(data_root: &Path, split: &str) -> Result<()> {
    let mut empty_classes = Vec::new();

    for block in &labels::DATASET_BLOCKS {
        let dataset_dir = data_root.join(block.dataset).join(split);
        if !dataset_dir.is_dir() {
            anyhow::bail!(
                "データセットディレクトリが存在しません: {}",
                dataset_dir.display()
            );
        }

        for &class_name in block.classes {
            let class_dir = dataset_dir.join(class_name);
            let image_count = if class_dir.is_dir() {
                collect_samples(&dataset_dir, &[class_name])?.len()
            } else {
                0
            };
            if image_count == 0 {
                empty_classes.push(format!("{}/{}/{}", block.dataset, split, class_name));
            }
        }
    }

    if !empty_classes.is_empty() {
        anyhow::bail!(
            "以下のクラスディレクトリに画像が1枚もありません:\n{}",
            empty_classes.join("\n")
        );
    }

    Ok(())
}

/// モデル学習を実行
///
/// 統合train setでの学習と統合test setでの評価を固定エポック数だけ
/// 繰り返し、最終パラメータをメタデータ付きチェックポイントとして
/// `output_model_path` に保存する（上書き）。
/// 途中チェックポイント・早期終了・再開はなし。
pub fn train_model(config: &AppConfig, data_root: &Path, output_model_path: &Path) -> Result<String> {
    use burn::{
        data::dataloader::DataLoaderBuilder,
        optim::AdamConfig,
        record::{DefaultFileRecorder, FullPrecisionSettings},
        train::{
            metric::{AccuracyMetric, LossMetric},
            LearnerBuilder, LearningStrategy,
        },
    };

    println!("[train] 学習データの検証を開始します...");
    validate_data_layout(data_root, "train")?;
    validate_data_layout(data_root, "test")?;
    println!("[train] 検証完了: すべてのクラスディレクトリは有効です");

    let dataset_train = CombinedDataset::load(data_root, "train")?;
    let dataset_test = CombinedDataset::load(data_root, "test")?;
    println!("[train] 学習データ: {} 枚", dataset_train.num_samples());
    println!("[train] 評価データ: {} 枚", dataset_test.num_samples());

    let device = select_device(&config.device_type);
    println!("[train] 使用デバイス: {:?}", device);

    // バッチャー作成
    let batcher_train = ClassifierBatcher::<TrainBackend>::new(device.clone(), IMAGE_SIZE);
    let batcher_valid = ClassifierBatcher::<crate::ml::InferenceBackend>::new(
        device.clone(),
        IMAGE_SIZE,
    );

    // データローダー作成（学習側のみシード付きシャッフル）
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.training.batch_size)
        .shuffle(config.training.seed)
        .num_workers(config.training.num_workers)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.training.batch_size)
        .num_workers(config.training.num_workers)
        .build(dataset_test);

    // モデル設定
    let model_config = ModelConfig {
        num_classes: NUM_CLASSES,
        dropout: config.model.dropout,
        image_size: IMAGE_SIZE,
    };
    println!(
        "[train] モデル設定: {} クラス, 入力サイズ: {}x{}, dropout={}",
        model_config.num_classes, IMAGE_SIZE, IMAGE_SIZE, model_config.dropout
    );
    let model = model_config.init::<TrainBackend>(&device);

    // アーティファクトディレクトリ作成
    let artifact_dir = std::env::temp_dir().join("unified_classifier_training");
    std::fs::create_dir_all(&artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    println!(
        "[train] 学習を開始します... エポック数: {}, バッチサイズ: {}, 学習率: {}",
        config.training.num_epochs, config.training.batch_size, config.training.learning_rate
    );

    // Learner構築（エポックごとにtrain/validの損失と正解率を報告）
    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(config.training.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), config.training.learning_rate);

    // 学習実行
    let model_trained = learner.fit(dataloader_train, dataloader_valid);
    let trained_model = model_trained.model;

    // 学習済みモデルをf32精度で一時保存してバイナリを取り出す
    let temp_model_path = artifact_dir.join("model");
    trained_model.save_file(
        &temp_model_path,
        &DefaultFileRecorder::<FullPrecisionSettings>::new(),
    )?;

    let model_binary_path = format!("{}.mpk", temp_model_path.display());
    let model_binary = std::fs::read(&model_binary_path)
        .with_context(|| format!("モデルバイナリの読み込みに失敗しました: {}", model_binary_path))?;
    println!(
        "[train] モデルバイナリサイズ: {} バイト ({:.2} MB)",
        model_binary.len(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    // メタデータを作成してモデルと共に保存
    let class_labels: Vec<String> = labels::class_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let metadata = ModelMetadata::new(
        class_labels,
        IMAGE_SIZE as u32,
        config.training.num_epochs as u32,
    );
    save_model_with_metadata(output_model_path, &metadata, &model_binary)?;

    // アーティファクトディレクトリをクリーンアップ
    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok(format!(
        "学習完了: {} に保存しました",
        output_model_path.display()
    ))
}
