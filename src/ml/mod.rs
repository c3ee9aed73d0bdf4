//! 機械学習モジュール
//!
//! バックエンドはcargoフィーチャで選択する:
//! - デフォルト: NdArray (CPU)
//! - `wgpu` フィーチャ有効時: WGPU (GPU、利用不可ならCPUアダプタへフォールバック)

pub mod inference;
pub mod ml_model;
pub mod training;

pub use inference::{InferenceEngine, Prediction};
pub use ml_model::{
    decode_rgb_image, load_and_normalize_image, preprocess_image, ModelConfig, UnifiedClassifier,
    IMAGE_SIZE,
};
pub use training::{train_model, ClassifierBatcher, CombinedDataset, ImageItem};

use crate::model::DeviceType;
use burn::tensor::backend::Backend;

/// 推論用バックエンド
#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn::backend::Wgpu;

/// 推論用バックエンド
#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn::backend::NdArray;

/// 学習用バックエンド（推論用バックエンドの自動微分ラッパー）
pub type TrainBackend = burn::backend::Autodiff<InferenceBackend>;

/// 設定に従って計算デバイスを選択
///
/// `wgpu` フィーチャが無効なビルドでWGPUが要求された場合は警告を出して
/// CPUへフォールバックする。
#[cfg(feature = "wgpu")]
pub fn select_device(device_type: &DeviceType) -> <InferenceBackend as Backend>::Device {
    match device_type {
        DeviceType::Wgpu => burn_wgpu::WgpuDevice::DiscreteGpu(0),
        DeviceType::Cpu => burn_wgpu::WgpuDevice::Cpu,
    }
}

/// 設定に従って計算デバイスを選択
///
/// `wgpu` フィーチャが無効なビルドでWGPUが要求された場合は警告を出して
/// CPUへフォールバックする。
#[cfg(not(feature = "wgpu"))]
pub fn select_device(device_type: &DeviceType) -> <InferenceBackend as Backend>::Device {
    if *device_type == DeviceType::Wgpu {
        eprintln!("警告: wgpuフィーチャが無効なためCPU (NdArray) を使用します");
    }
    burn_ndarray::NdArrayDevice::Cpu
}
