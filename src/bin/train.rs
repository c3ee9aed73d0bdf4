//! 統合データセットでのモデル学習用バイナリ
//!
//! 使い方:
//!   cargo run --bin train [データディレクトリ] [出力モデルパス]
//!
//! 省略時はconfig.jsonのdataset.data_dirとmodel.model_pathを使用する。
//! 学習完了時に最終パラメータをメタデータ付きチェックポイントとして
//! 保存する（上書き）。エラー時は回復せずに終了する。

use std::path::PathBuf;

use unified_classifier::ml::train_model;
use unified_classifier::AppConfig;

fn main() {
    println!("=== Unified Classifier Training ===\n");

    let config = AppConfig::load_or_default();
    config.display();

    // コマンドライン引数を取得
    let args: Vec<String> = std::env::args().collect();
    let data_dir = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.dataset.data_dir));
    let output_model_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.model.model_path));

    println!("データディレクトリ: {}", data_dir.display());
    println!("出力モデルパス: {}\n", output_model_path.display());

    match train_model(&config, &data_dir, &output_model_path) {
        Ok(message) => println!("{}", message),
        Err(e) => {
            eprintln!("✗ 学習エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}
