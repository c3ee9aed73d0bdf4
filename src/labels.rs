//! 統合ラベル空間の定義
//!
//! 4つのデータセット（CIFAR-10 / CIFAR-100 / MNIST / Fashion-MNIST）の
//! クラス名を固定順序で連結し、130クラスの統合ラベル空間を構成します。
//!
//! オフセットは学習時のラベルリマップと推論時のクラス名解決の両方で
//! この1つのテーブルから参照されます。ブロックの順序を変更する場合は
//! テーブルごと変更する必要があります（オフセットの手書き二重管理はしない）。

use anyhow::Result;

/// CIFAR-10のクラス名（ネイティブラベル順）
pub const CIFAR10_CLASSES: [&str; 10] = [
    "airplane", "automobile", "bird", "cat", "deer", "dog", "frog", "horse", "ship", "truck",
];

/// CIFAR-100のクラス名（ネイティブラベル順）
pub const CIFAR100_CLASSES: [&str; 100] = [
    "apple", "aquarium_fish", "baby", "bear", "beaver", "bed", "bee", "beetle", "bicycle",
    "bottle", "bowl", "boy", "bridge", "bus", "butterfly", "camel", "can", "castle",
    "caterpillar", "cattle", "chair", "chimpanzee", "clock", "cloud", "cockroach", "couch",
    "crab", "crocodile", "cup", "dinosaur", "dolphin", "elephant", "flatfish", "forest", "fox",
    "girl", "hamster", "house", "kangaroo", "keyboard", "lamp", "lawn_mower", "leopard", "lion",
    "lizard", "lobster", "man", "maple_tree", "motorcycle", "mountain", "mouse", "mushroom",
    "oak_tree", "orange", "orchid", "otter", "palm_tree", "pear", "pickup_truck", "pine_tree",
    "plain", "plate", "poppy", "porcupine", "possum", "rabbit", "raccoon", "ray", "road",
    "rocket", "rose", "sea", "seal", "shark", "shrew", "skunk", "skyscraper", "snail", "snake",
    "spider", "squirrel", "streetcar", "sunflower", "sweet_pepper", "table", "tank", "telephone",
    "television", "tiger", "tractor", "train", "trout", "tulip", "turtle", "wardrobe", "whale",
    "willow_tree", "wolf", "woman", "worm",
];

/// MNISTのクラス名（ネイティブラベル順）
pub const MNIST_CLASSES: [&str; 10] = [
    "digit_0", "digit_1", "digit_2", "digit_3", "digit_4", "digit_5", "digit_6", "digit_7",
    "digit_8", "digit_9",
];

/// Fashion-MNISTのクラス名（ネイティブラベル順）
pub const FASHION_MNIST_CLASSES: [&str; 10] = [
    "t-shirt", "trouser", "pullover", "dress", "coat", "sandal", "shirt", "sneaker", "bag",
    "ankle_boot",
];

/// 統合ラベル空間の総クラス数（10 + 100 + 10 + 10）
pub const NUM_CLASSES: usize = 130;

/// 1データセット分のブロック定義
///
/// - `dataset`: データセット識別子（データディレクトリ名と一致）
/// - `offset`: 統合ラベル空間内でのオフセット
/// - `classes`: ネイティブラベル順のクラス名
#[derive(Debug, Clone, Copy)]
pub struct DatasetBlock {
    pub dataset: &'static str,
    pub offset: usize,
    pub classes: &'static [&'static str],
}

/// データセット→オフセット→クラス名の宣言テーブル
///
/// 学習と推論の双方がこのテーブルだけを参照する。
/// 各ブロックのoffsetは先行ブロックのクラス数の累積和と一致していなければ
/// ならない（テストで検証）。
pub const DATASET_BLOCKS: [DatasetBlock; 4] = [
    DatasetBlock {
        dataset: "cifar10",
        offset: 0,
        classes: &CIFAR10_CLASSES,
    },
    DatasetBlock {
        dataset: "cifar100",
        offset: 10,
        classes: &CIFAR100_CLASSES,
    },
    DatasetBlock {
        dataset: "mnist",
        offset: 110,
        classes: &MNIST_CLASSES,
    },
    DatasetBlock {
        dataset: "fashion_mnist",
        offset: 120,
        classes: &FASHION_MNIST_CLASSES,
    },
];

/// 統合ラベル空間の全クラス名を順序付きで返す
///
/// 常に同じ130要素を返す（純粋な構築、エラー条件なし）。
pub fn class_names() -> Vec<&'static str> {
    let mut names = Vec::with_capacity(NUM_CLASSES);
    for block in &DATASET_BLOCKS {
        names.extend_from_slice(block.classes);
    }
    names
}

/// 統合ラベルインデックスからクラス名を取得
pub fn class_name(index: usize) -> Option<&'static str> {
    for block in &DATASET_BLOCKS {
        if index < block.offset + block.classes.len() {
            return block.classes.get(index - block.offset).copied();
        }
    }
    None
}

/// データセット識別子からオフセットを取得
pub fn offset_for(dataset: &str) -> Option<usize> {
    DATASET_BLOCKS
        .iter()
        .find(|b| b.dataset == dataset)
        .map(|b| b.offset)
}

/// ネイティブラベルを統合ラベル空間へリマップ
///
/// ネイティブ範囲 [0, n) のラベルを [offset, offset + n) へシフトする。
/// ネイティブ範囲外のラベル（リマップ済みラベルの二重適用を含む）は
/// エラーとして拒否する。
pub fn remap_label(native: usize, block: &DatasetBlock) -> Result<usize> {
    if native >= block.classes.len() {
        anyhow::bail!(
            "ネイティブラベル {} はデータセット '{}' の範囲外です (0..{})。\
             リマップの二重適用の可能性があります",
            native,
            block.dataset,
            block.classes.len()
        );
    }
    Ok(native + block.offset)
}
