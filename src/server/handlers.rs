//! HTTPリクエストハンドラとレスポンス型

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::labels;
use crate::ml::inference::NonFiniteOutputError;
use crate::ml::{decode_rgb_image, Prediction};
use crate::server::{ClassifyError, ServerState};

/// レスポンスで返す予測エントリ（確率は "NN.N%" 形式の文字列）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledProbability {
    /// クラス名
    pub label: String,
    /// 確率（例: "87.3%"）
    pub probability: String,
}

/// `POST /predict` のレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    /// 最上位の予測
    pub top_prediction: LabeledProbability,
    /// 2位以下の予測（4件、確率の降順）
    pub others: Vec<LabeledProbability>,
}

/// エラーレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// エラーメッセージ
    pub error: String,
}

/// `GET /health` のレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// サービス状態
    pub status: String,
    /// サービスバージョン
    pub version: String,
    /// 分類クラス数
    pub num_classes: usize,
    /// モデル入力サイズ
    pub model_input_size: usize,
}

/// 確率を "NN.N%" 形式の文字列に変換
pub fn format_probability(probability: f32) -> String {
    format!("{:.1}%", probability * 100.0)
}

/// リクエストIDを生成（ログ用）
fn request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}

impl PredictResponse {
    /// 分類結果（確率の降順）からレスポンスを構築
    fn from_predictions(predictions: &[Prediction]) -> Result<Self, ClassifyError> {
        let top = predictions
            .first()
            .ok_or_else(|| ClassifyError::Internal("予測結果が空です".to_string()))?;

        Ok(Self {
            top_prediction: LabeledProbability {
                label: top.label.clone(),
                probability: format_probability(top.probability),
            },
            others: predictions[1..]
                .iter()
                .map(|p| LabeledProbability {
                    label: p.label.clone(),
                    probability: format_probability(p.probability),
                })
                .collect(),
        })
    }
}

/// 画像分類ハンドラ
///
/// multipartの `image` フィールドから画像を読み取り、確率上位5クラスを
/// 返す。リクエストごとに独立・ステートレスで、共有されるのは読み取り
/// 専用のモデル重みのみ。
pub async fn predict_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ClassifyError> {
    let req_id = request_id();
    println!("[predict] リクエスト受信 ({})", req_id);

    // multipartからimageフィールドを探す
    let mut image_bytes = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ClassifyError::InvalidInput(format!("multipartの解析に失敗しました: {}", e))
    })? {
        if field.name() == Some("image") {
            let bytes = field.bytes().await.map_err(|e| {
                ClassifyError::InvalidInput(format!("imageフィールドの読み取りに失敗しました: {}", e))
            })?;
            image_bytes = Some(bytes);
            break;
        }
    }

    let bytes = image_bytes
        .ok_or_else(|| ClassifyError::InvalidInput("imageフィールドがありません".to_string()))?;
    if bytes.is_empty() {
        return Err(ClassifyError::InvalidInput(
            "imageフィールドが空です".to_string(),
        ));
    }

    // デコード失敗はクライアント起因として扱う
    let img =
        decode_rgb_image(&bytes).map_err(|e| ClassifyError::InvalidInput(format!("{:#}", e)))?;

    let predictions = state.engine.classify(&img, 5).map_err(|e| {
        if e.is::<NonFiniteOutputError>() {
            ClassifyError::ModelUnavailable(e.to_string())
        } else {
            ClassifyError::Internal(format!("{:#}", e))
        }
    })?;

    let response = PredictResponse::from_predictions(&predictions)?;
    println!(
        "[predict] 結果 ({}): {} ({})",
        req_id, response.top_prediction.label, response.top_prediction.probability
    );

    Ok(Json(response))
}

/// ヘルスチェックハンドラ
///
/// ウォームアップ検証を通過したエンジンが注入済みの場合のみサーバーが
/// 起動しているため、応答できること自体がready状態を意味する。
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        num_classes: labels::NUM_CLASSES,
        model_input_size: state.engine.input_size(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::NUM_CLASSES;
    use crate::ml::{InferenceBackend, InferenceEngine, ModelConfig, IMAGE_SIZE};
    use crate::server::{create_router, ServerState};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn test_app() -> Router {
        let device = Default::default();
        let model = ModelConfig::new(NUM_CLASSES).init::<InferenceBackend>(&device);
        let engine = InferenceEngine::from_model(model, IMAGE_SIZE).unwrap();
        create_router(ServerState::new(Arc::new(engine)))
    }

    /// multipart/form-dataのボディを手組みする
    fn multipart_body(field_name: &str, data: &[u8]) -> (String, Vec<u8>) {
        let boundary = "test-boundary-7MA4YWxkTrZu0gW";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"test.png\"\r\n",
                field_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", boundary),
            body,
        )
    }

    fn solid_color_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    fn predict_request(content_type: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap()
    }

    fn parse_percent(s: &str) -> f32 {
        s.trim_end_matches('%').parse::<f32>().unwrap()
    }

    #[test]
    fn test_format_probability() {
        assert_eq!(format_probability(0.0), "0.0%");
        assert_eq!(format_probability(1.0), "100.0%");
        assert_eq!(format_probability(0.1234), "12.3%");
    }

    #[test]
    fn test_predict_response_serialization() {
        let response = PredictResponse {
            top_prediction: LabeledProbability {
                label: "cat".to_string(),
                probability: "87.3%".to_string(),
            },
            others: vec![LabeledProbability {
                label: "dog".to_string(),
                probability: "5.1%".to_string(),
            }],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("top_prediction"));
        assert!(json.contains("87.3%"));
        assert!(json.contains("dog"));
    }

    #[tokio::test]
    async fn test_health_handler_via_http() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.num_classes, 130);
    }

    #[tokio::test]
    async fn test_predict_missing_image_field() {
        // imageではないフィールド名で送ると400 + errorのみのボディになる
        let (content_type, body) = multipart_body("file", &solid_color_png(8, 8, [0, 0, 0]));
        let response = test_app()
            .oneshot(predict_request(&content_type, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(!json["error"].as_str().unwrap().is_empty());
        assert!(json.get("top_prediction").is_none());
    }

    #[tokio::test]
    async fn test_predict_corrupt_image() {
        let (content_type, body) = multipart_body("image", b"this is not an image");
        let response = test_app()
            .oneshot(predict_request(&content_type, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(!json["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_predict_valid_image() {
        // 単色64x64の画像で200が返り、top-5の構造と語彙を満たす
        let (content_type, body) = multipart_body("image", &solid_color_png(64, 64, [120, 80, 40]));
        let response = test_app()
            .oneshot(predict_request(&content_type, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let predict: PredictResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(predict.others.len(), 4);

        // top_predictionの確率はothersの先頭以上
        let top_prob = parse_percent(&predict.top_prediction.probability);
        let second_prob = parse_percent(&predict.others[0].probability);
        assert!(top_prob >= second_prob);

        // 全ラベルは130クラスの語彙から選ばれている
        let vocabulary: HashSet<&str> = labels::class_names().into_iter().collect();
        assert!(vocabulary.contains(predict.top_prediction.label.as_str()));
        for entry in &predict.others {
            assert!(vocabulary.contains(entry.label.as_str()));
        }
    }

    #[tokio::test]
    async fn test_predict_is_idempotent() {
        // 同じ画像バイト列に対するレスポンスは完全に一致する
        let app = test_app();
        let png = solid_color_png(64, 64, [200, 30, 60]);

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let (content_type, body) = multipart_body("image", &png);
            let response = app
                .clone()
                .oneshot(predict_request(&content_type, body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            bodies.push(response.into_body().collect().await.unwrap().to_bytes());
        }
        assert_eq!(bodies[0], bodies[1]);
    }
}
