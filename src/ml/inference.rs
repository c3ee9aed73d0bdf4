//! モデル推論エンジン
//!
//! 起動時にチェックポイントを1回だけ読み込み、以降は読み取り専用の
//! サービスオブジェクトとして全リクエストで共有されます（Arc経由、ロック不要）。
//!
//! 初期化は2段階（構築 + ウォームアップ検証）で、検証に失敗した場合は
//! エラーを返して起動を中止します。壊れたモデルのままreadyにはなりません。

use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use image::RgbImage;

use crate::labels;
use crate::ml::ml_model::{preprocess_image, ModelConfig, UnifiedClassifier};
use crate::ml::InferenceBackend;
use crate::model::load_model_with_metadata;

/// 分類結果の1エントリ（クラス名と確率）
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

/// モデル出力に非有限値（NaN / inf）が含まれていたことを示すエラー
///
/// 読み込み自体は成功したが正常な予測を生成できないモデルを、
/// リクエスト処理側で「モデル利用不可」として区別するために使う。
#[derive(Debug)]
pub struct NonFiniteOutputError;

impl fmt::Display for NonFiniteOutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "モデル出力に非有限値が含まれています")
    }
}

impl std::error::Error for NonFiniteOutputError {}

/// 推論エンジン
pub struct InferenceEngine {
    model: UnifiedClassifier<InferenceBackend>,
    device: <InferenceBackend as Backend>::Device,
    input_size: usize,
}

impl InferenceEngine {
    /// チェックポイントを読み込んで推論エンジンを初期化
    ///
    /// 1. メタデータのクラスラベルをコードのラベルテーブルと照合（不一致は致命的エラー）
    /// 2. モデルを構築して重みを復元
    /// 3. ウォームアップ順伝播で出力形状を検証（失敗は致命的エラー）
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;

        // チェックポイントとラベルテーブルの整合性チェック
        // クラス数だけでなく順序も一致していなければ、形としては読めても
        // インデックスと名前の対応が壊れるため起動を中止する
        let expected = labels::class_names();
        if metadata.class_labels.len() != expected.len() {
            anyhow::bail!(
                "チェックポイントのクラス数 {} がラベルテーブルのクラス数 {} と一致しません",
                metadata.class_labels.len(),
                expected.len()
            );
        }
        for (i, (saved, current)) in metadata.class_labels.iter().zip(expected.iter()).enumerate()
        {
            if saved != current {
                anyhow::bail!(
                    "チェックポイントのクラスラベルがラベルテーブルと一致しません \
                     (インデックス {}: '{}' != '{}')",
                    i,
                    saved,
                    current
                );
            }
        }

        let device = Default::default();
        let input_size = metadata.model_input_size as usize;

        // モデル設定（推論時はドロップアウトなし）
        let model_config = ModelConfig {
            num_classes: metadata.num_classes(),
            dropout: 0.0,
            image_size: input_size,
        };
        let model = model_config.init::<InferenceBackend>(&device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        Self::from_model(model, input_size)
    }

    /// 構築済みモデルから推論エンジンを初期化（ウォームアップ検証付き）
    pub fn from_model(model: UnifiedClassifier<InferenceBackend>, input_size: usize) -> Result<Self> {
        let engine = Self {
            model,
            device: Default::default(),
            input_size,
        };
        engine.warm_up().context("モデルのウォームアップ検証に失敗しました")?;
        Ok(engine)
    }

    /// ウォームアップ順伝播
    ///
    /// ダミー入力で1回推論を実行し、読み込み・形状の問題を起動時に検出する。
    fn warm_up(&self) -> Result<()> {
        let dummy = Tensor::<InferenceBackend, 4>::zeros(
            [1, 3, self.input_size, self.input_size],
            &self.device,
        );
        let output = self.model.forward(dummy);
        let dims = output.dims();
        if dims != [1, labels::NUM_CLASSES] {
            anyhow::bail!(
                "ウォームアップ出力の形状が不正です: {:?} (期待: [1, {}])",
                dims,
                labels::NUM_CLASSES
            );
        }
        println!("[inference] ウォームアップ成功 (出力: {:?})", dims);
        Ok(())
    }

    /// RGB画像を分類して確率上位k件を返す
    ///
    /// リサイズ -> 正規化 -> 順伝播 -> softmax -> top-k選択。
    /// 結果は確率の降順（同値はクラスインデックスの昇順）。
    pub fn classify(&self, img: &RgbImage, k: usize) -> Result<Vec<Prediction>> {
        let image_data = preprocess_image(img, self.input_size);

        // Tensorに変換 [1, 3, size, size]
        let tensor = Tensor::<InferenceBackend, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, self.input_size, self.input_size]);

        let logits = self.model.forward(tensor);
        let probabilities: Vec<f32> = softmax(logits, 1)
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(NonFiniteOutputError.into());
        }

        // 安定ソートなので同値の確率はクラスインデックス順になる
        let mut indexed: Vec<(usize, f32)> = probabilities.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        indexed
            .into_iter()
            .take(k)
            .map(|(idx, prob)| {
                let label = labels::class_name(idx)
                    .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", idx))?;
                Ok(Prediction {
                    label: label.to_string(),
                    probability: prob,
                })
            })
            .collect()
    }

    /// モデル入力サイズを取得
    pub fn input_size(&self) -> usize {
        self.input_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::NUM_CLASSES;
    use std::collections::HashSet;

    fn test_engine() -> InferenceEngine {
        let device = Default::default();
        let model = ModelConfig::new(NUM_CLASSES).init::<InferenceBackend>(&device);
        InferenceEngine::from_model(model, crate::ml::IMAGE_SIZE).unwrap()
    }

    #[test]
    fn test_warm_up_rejects_wrong_head_size() {
        // 出力層が130クラスでないモデルは初期化時点で拒否される
        let device = Default::default();
        let model = ModelConfig::new(10).init::<InferenceBackend>(&device);
        let result = InferenceEngine::from_model(model, crate::ml::IMAGE_SIZE);
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_top5_properties() {
        let engine = test_engine();
        let img = RgbImage::from_pixel(64, 64, image::Rgb([90, 150, 210]));
        let predictions = engine.classify(&img, 5).unwrap();

        assert_eq!(predictions.len(), 5);

        let vocabulary: HashSet<&str> = labels::class_names().into_iter().collect();
        for p in &predictions {
            assert!(p.probability >= 0.0 && p.probability <= 1.0);
            assert!(vocabulary.contains(p.label.as_str()));
        }

        // 確率は降順（広義単調減少）
        for pair in predictions.windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }

        // top-5は130クラスの一部なので合計が1になる必要はない
        let sum: f32 = predictions.iter().map(|p| p.probability).sum();
        assert!(sum <= 1.0 + 1e-5);
    }

    #[test]
    fn test_classify_is_deterministic() {
        // 評価時は確率的な層が無効なため、同じ入力は同じ結果になる
        let engine = test_engine();
        let img = RgbImage::from_pixel(48, 48, image::Rgb([10, 200, 40]));
        let first = engine.classify(&img, 5).unwrap();
        let second = engine.classify(&img, 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_classify_arbitrary_resolutions() {
        let engine = test_engine();
        for size in [1u32, 17, 32, 100] {
            let img = RgbImage::from_pixel(size, size, image::Rgb([128, 128, 128]));
            let predictions = engine.classify(&img, 5).unwrap();
            assert_eq!(predictions.len(), 5);
        }
    }
}
