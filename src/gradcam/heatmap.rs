//! 勾配で重み付けした活性化マップ（ヒートマップ）の計算

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{GradCamError, Result};

/// 最大値が0以下だったときの塗りつぶし値
pub const UNIFORM_FILL: f32 = 0.5;

/// Grad-CAMの生マップを計算
///
/// # 引数
/// - `activation`: 対象レイヤーの出力 [batch, C, H, W]
/// - `gradient`: 予測クラスのスコアに対する `activation` の勾配 [batch, C, H, W]
///
/// # 戻り値
/// - [H, W] のマップ（負値は0に切り捨て済み、未正規化）
pub fn weighted_activation_map<B: Backend>(activation: Tensor<B, 4>, gradient: Tensor<B, 4>) -> Tensor<B, 2> {
    let [_, _, height, width] = activation.dims();

    // チャネルごとの重み: バッチ・空間方向の平均 [1, C, 1, 1]
    let weights = gradient.mean_dim(0).mean_dim(2).mean_dim(3);

    // 先頭バッチの活性化を重み付けし、チャネル平均 [1, 1, H, W]
    let weighted = activation.slice([0..1]) * weights;
    let cam = weighted.mean_dim(1);

    cam.clamp_min(0.0).reshape([height, width])
}

/// 2次元のヒートマップ（行優先）
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    width: usize,
    height: usize,
    values: Vec<f32>,
    uniform: bool,
}

impl Heatmap {
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || values.len() != width * height {
            return Err(GradCamError::Computation(format!(
                "ヒートマップの形状が不正です: {}x{} (要素数 {})",
                width,
                height,
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
            uniform: false,
        })
    }

    /// [H, W] テンソルから生成
    pub fn from_tensor<B: Backend>(map: Tensor<B, 2>) -> Result<Self> {
        let [height, width] = map.dims();
        let values = map
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| GradCamError::Computation(format!("ヒートマップの取得エラー: {:?}", e)))?;
        Self::new(width, height, values)
    }

    /// 0～1に正規化
    ///
    /// 最大値が正ならその値で割り、そうでなければ（どこにも反応が無い）
    /// 一様な0.5のマップにします。負値と非有限値は先に0へ落とします。
    pub fn normalize(mut self) -> Self {
        for value in self.values.iter_mut() {
            if !value.is_finite() || *value < 0.0 {
                *value = 0.0;
            }
        }

        let max = self.max();
        if max > 0.0 {
            for value in self.values.iter_mut() {
                *value = (*value / max).min(1.0);
            }
        } else {
            tracing::warn!("ヒートマップが空です。一様な値 {} を使用します", UNIFORM_FILL);
            self.values.iter_mut().for_each(|value| *value = UNIFORM_FILL);
            self.uniform = true;
        }
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// 正規化で一様マップに置き換えられたか
    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn min(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }
}
