//! Grad-CAMエンジンのエラー型

use thiserror::Error;

/// [`GradCamError`] を使う Result
pub type Result<T> = std::result::Result<T, GradCamError>;

/// オーバーレイを生成できなかった理由
#[derive(Debug, Error)]
pub enum GradCamError {
    /// 入力画像をモデル入力に変換できない
    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    /// モデルの探索・復元・検証に失敗
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// 指定レイヤーも "conv" を含む代替レイヤーも使えない
    #[error("layer resolution failed: {0}")]
    LayerResolution(String),

    /// 推論・勾配計算・画像処理中の失敗
    #[error("computation failed: {0}")]
    Computation(String),
}

impl From<anyhow::Error> for GradCamError {
    fn from(error: anyhow::Error) -> Self {
        GradCamError::ModelUnavailable(format!("{:#}", error))
    }
}
