//! 推論HTTPサーバー
//!
//! # エンドポイント
//!
//! - `POST /predict` - multipartの `image` フィールドで画像を受け取り、
//!   確率上位5クラスをJSONで返す
//! - `GET /health`   - ヘルスチェック
//!
//! 推論エンジンは起動時に1回だけ構築され、`ServerState` 経由で各
//! ハンドラに注入される（プロセス全体で共有するグローバル状態は持たない）。
//! ウォームアップ検証を通過したエンジンしか注入されないため、
//! サーバーが起動していること自体がreadyの条件になる。

mod handlers;

pub use handlers::{
    health_handler, predict_handler, ErrorResponse, HealthResponse, LabeledProbability,
    PredictResponse,
};

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::ml::InferenceEngine;

/// ハンドラ間で共有されるサーバー状態
#[derive(Clone)]
pub struct ServerState {
    /// 推論エンジン（初期化後は読み取り専用、ロック不要で共有）
    pub engine: Arc<InferenceEngine>,
}

impl ServerState {
    /// 新しいサーバー状態を作成
    pub fn new(engine: Arc<InferenceEngine>) -> Self {
        Self { engine }
    }
}

/// 分類リクエスト処理のエラー分類
///
/// クライアント起因・モデル起因・その他を区別し、HTTPステータスコードに
/// 対応付ける。レスポンスボディは常に `{"error": ...}` 形式。
#[derive(Debug)]
pub enum ClassifyError {
    /// 不正な入力（フィールド欠落、画像デコード失敗など） -> 400
    InvalidInput(String),
    /// モデルが正常な予測を生成できない状態 -> 503
    ModelUnavailable(String),
    /// その他の内部エラー -> 500
    Internal(String),
}

impl ClassifyError {
    /// 対応するHTTPステータスコード
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClassifyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ClassifyError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClassifyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifyError::InvalidInput(msg) => write!(f, "不正な入力: {}", msg),
            ClassifyError::ModelUnavailable(msg) => write!(f, "モデル利用不可: {}", msg),
            ClassifyError::Internal(msg) => write!(f, "内部エラー: {}", msg),
        }
    }
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        eprintln!("[predict] エラー: {}", self);
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// ルーターを構築
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}
