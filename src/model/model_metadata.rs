//! モデルメタデータの定義
//!
//! チェックポイント（tar.gz）に `metadata.json` として同梱される情報。
//! チェックポイント自体にはクラス数やアーキテクチャの情報が含まれない
//! ため、読み込み側はこのメタデータで互換性を確認します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 統合ラベル空間の全クラス名（学習時の順序）
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（CNNへの入力解像度、通常32x32）
    pub model_input_size: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(class_labels: Vec<String>, model_input_size: u32, num_epochs: u32) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            model_input_size,
            num_epochs,
            trained_at,
        }
    }

    /// クラス数を取得
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let metadata = ModelMetadata::new(
            vec!["airplane".to_string(), "automobile".to_string()],
            32,
            50,
        );
        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(restored.class_labels, metadata.class_labels);
        assert_eq!(restored.model_input_size, 32);
        assert_eq!(restored.num_epochs, 50);
        assert_eq!(restored.trained_at, metadata.trained_at);
    }

    #[test]
    fn test_num_classes() {
        let metadata = ModelMetadata::new(vec!["a".to_string(); 130], 32, 1);
        assert_eq!(metadata.num_classes(), 130);
    }
}
