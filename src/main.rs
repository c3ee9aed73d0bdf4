//! 推論HTTPサーバーのエントリポイント
//!
//! 起動手順:
//! 1. 設定を読み込む（config.json、無ければデフォルト）
//! 2. チェックポイントから推論エンジンを構築し、ウォームアップで検証する
//!    （失敗した場合はリッスンせずに終了する）
//! 3. ルーターを構築してリッスンを開始する

use std::path::Path;
use std::sync::Arc;

use unified_classifier::{create_router, AppConfig, InferenceEngine, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Unified Classifier Server ===\n");

    let config = AppConfig::load_or_default();
    config.display();

    // 2段階初期化: 構築 + ウォームアップ検証
    // ここで失敗した場合はエラーで終了し、壊れたモデルのまま
    // リクエストを受け付けることはない
    println!("モデルを読み込みます: {}", config.model.model_path);
    let engine = InferenceEngine::load(Path::new(&config.model.model_path))?;
    println!("モデルの読み込みと検証が完了しました");

    let state = ServerState::new(Arc::new(engine));
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    println!("\nサーバーを開始します: http://{}", addr);
    println!("エンドポイント:");
    println!("  POST /predict - 画像分類 (multipart, フィールド名: image)");
    println!("  GET  /health  - ヘルスチェック");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
