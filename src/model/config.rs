//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・モデル・学習・サーバーの設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 使用するモデルファイルのパス
    pub model_path: String,
    /// 学習時のドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/unified_classifier.tar.gz".to_string(),
            dropout: 0.5,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// データローダーのワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// シャッフル用のランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 128,
            num_workers: 2,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

/// HTTPサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// リッスンするホスト
    pub host: String,
    /// リッスンするポート
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// データセットのルートディレクトリ
    pub data_dir: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類（学習時に使用）
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// サーバー設定
    pub server: ServerSettings,
    /// データセット設定
    pub dataset: DatasetSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    println!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    eprintln!(
                        "警告: 設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    eprintln!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            println!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("モデルパス: {}", self.model.model_path);
        println!("ドロップアウト率: {}", self.model.dropout);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("シード: {}", self.training.seed);
        println!("データディレクトリ: {}", self.dataset.data_dir);
        println!("\n--- サーバー設定 ---");
        println!("リッスンアドレス: {}:{}", self.server.host, self.server.port);
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.training.num_epochs, 50);
        assert_eq!(config.training.batch_size, 128);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.model_path, deserialized.model.model_path);
        assert_eq!(config.server.host, deserialized.server.host);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
