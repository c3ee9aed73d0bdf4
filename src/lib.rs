//! 統合画像分類ライブラリ
//!
//! 4つの画像データセット（CIFAR-10 / CIFAR-100 / MNIST / Fashion-MNIST）を
//! 統合した130クラスのラベル空間で画像分類を行います。
//!
//! - [`labels`]: データセット→オフセット→クラス名の宣言テーブル
//! - [`ml`]: CNNモデル・前処理・推論エンジン・学習ループ
//! - [`model`]: 設定とチェックポイント（メタデータ + 重み）の永続化
//! - [`server`]: 推論HTTPサーバー（`POST /predict`）

pub mod labels;
pub mod ml;
pub mod model;
pub mod server;

pub use ml::{InferenceEngine, Prediction};
pub use model::AppConfig;
pub use server::{create_router, ServerState};
