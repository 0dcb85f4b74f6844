//! レイヤー情報とGrad-CAMが要求するモデルのインターフェース

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// レイヤーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Conv2d,
    MaxPool2d,
    GlobalAvgPool,
    Dense,
}

impl LayerKind {
    /// 空間方向の活性化マップ [batch, C, H, W] を出力するか
    pub fn is_spatial(&self) -> bool {
        matches!(self, LayerKind::Conv2d | LayerKind::MaxPool2d)
    }
}

/// 名前付きレイヤー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub kind: LayerKind,
    /// 定義順（入力側から0始まり）
    pub index: usize,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, kind: LayerKind, index: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            index,
        }
    }
}

/// Grad-CAMエンジンが依存するモデルの操作
///
/// 予測、名前によるレイヤー検索、レイヤー活性化の取得、
/// そのレイヤーから出力までの再計算だけを要求します。
/// 再計算を分離しておくことで、活性化に対する勾配を
/// 自動微分バックエンドで求められます。
pub trait LayeredClassifier<B: Backend> {
    /// 入力画像の一辺（正方形）
    fn input_size(&self) -> usize;

    /// 出力クラス数
    fn num_classes(&self) -> usize;

    /// 定義順のレイヤー一覧
    fn layers(&self) -> &[LayerInfo];

    /// 名前でレイヤーを検索
    fn get_layer(&self, name: &str) -> Option<&LayerInfo> {
        self.layers().iter().find(|layer| layer.name == name)
    }

    /// クラス確率 [batch, num_classes]
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2>;

    /// 入力から指定レイヤーの出力までを計算 [batch, C, H, W]
    ///
    /// 空間方向の活性化を持たないレイヤーは `LayerResolution` エラー。
    fn activation(&self, layer: &LayerInfo, input: Tensor<B, 4>) -> Result<Tensor<B, 4>>;

    /// 指定レイヤーの出力からクラス確率までを計算
    fn predict_from(&self, layer: &LayerInfo, activation: Tensor<B, 4>) -> Result<Tensor<B, 2>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_kinds() {
        assert!(LayerKind::Conv2d.is_spatial());
        assert!(LayerKind::MaxPool2d.is_spatial());
        assert!(!LayerKind::GlobalAvgPool.is_spatial());
        assert!(!LayerKind::Dense.is_spatial());
    }
}
