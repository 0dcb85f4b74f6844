//! Grad-CAM（Gradient-weighted Class Activation Mapping）
//!
//! 予測クラスのスコアを対象の畳み込み層の活性化で微分し、チャネルごとの
//! 重みで活性化を合成したヒートマップを元画像に重ねます。
//!
//! 処理の流れ:
//! 1. 前処理（グレースケール、モデル入力サイズへ変換）
//! 2. 推論し、確率最大のクラスを対象にする
//! 3. 対象レイヤーの解決（無ければ "conv" を含む最も出力側のレイヤー）
//! 4. 活性化に対する勾配 -> チャネル重み
//! 5. 重み付き活性化のチャネル平均 -> ReLU -> 正規化
//! 6. jet でカラー化し、元画像と 0.4 : 0.6 で合成

pub mod heatmap;
pub mod overlay;
pub mod preprocess;

use burn::tensor::{backend::AutodiffBackend, backend::Backend, Tensor};
use image::{DynamicImage, RgbImage};
use std::panic::{self, AssertUnwindSafe};

use crate::error::{GradCamError, Result};
use crate::ml::{LayerInfo, LayeredClassifier, ModelProvider};
use crate::model::{AppConfig, DeviceType, OverlaySettings};
#[cfg(feature = "gpu")]
use crate::runtime::GpuBackend;
use crate::runtime::{self, CpuBackend};

pub use heatmap::{weighted_activation_map, Heatmap, UNIFORM_FILL};
pub use overlay::{jet, Visualizer};
pub use preprocess::{normalize_image, preprocess};

/// Grad-CAMの結果
#[derive(Debug, Clone)]
pub struct GradCamOutput {
    /// 表示用の重ね合わせ画像（RGB）
    pub overlay: RgbImage,
    /// 予測クラス
    pub predicted_class: usize,
    /// クラス確率
    pub probabilities: Vec<f32>,
    /// 実際に使用したレイヤー名
    pub layer_name: String,
    /// 正規化済みヒートマップ（レイヤー出力の解像度）
    pub heatmap: Heatmap,
}

/// 対象レイヤーを解決
///
/// 名前が見つからなければ、定義の逆順（出力側から）に名前へ "conv" を含み
/// 空間方向の活性化を持つ最初のレイヤーを使います。"conv" を含むレイヤーが
/// 複数の深さにある場合は最も出力側が選ばれます。
pub fn resolve_target_layer<'a>(layers: &'a [LayerInfo], name: &str) -> Result<&'a LayerInfo> {
    if let Some(layer) = layers.iter().find(|layer| layer.name == name) {
        if !layer.kind.is_spatial() {
            return Err(GradCamError::LayerResolution(format!(
                "レイヤー '{}' ({:?}) は空間方向の活性化を持ちません",
                layer.name, layer.kind
            )));
        }
        return Ok(layer);
    }

    tracing::warn!("レイヤー '{}' が見つかりません", name);
    match layers
        .iter()
        .rev()
        .find(|layer| layer.name.to_lowercase().contains("conv") && layer.kind.is_spatial())
    {
        Some(layer) => {
            tracing::info!("代替レイヤーを使用します: {}", layer.name);
            Ok(layer)
        }
        None => Err(GradCamError::LayerResolution(format!(
            "'{}' が無く、代替となる畳み込みレイヤーもありません",
            name
        ))),
    }
}

/// 確率最大のクラス（同値なら先頭、NaNは無視）
pub fn predicted_class(probabilities: &[f32]) -> Option<usize> {
    probabilities
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (idx, &p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((idx, p)),
        })
        .map(|(idx, _)| idx)
}

fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| GradCamError::Computation(format!("テンソルの取得エラー: {:?}", e)))
}

/// パニックを捕捉してエラーに変換（エンジンの境界で使用）
pub(crate) fn catch_faults<T>(
    stage: &str,
    to_error: fn(String) -> GradCamError,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let backtrace = std::backtrace::Backtrace::force_capture();
            tracing::error!("{}中に致命的なエラー: {}\n{}", stage, message, backtrace);
            Err(to_error(message))
        }
    }
}

/// 読み込み済みモデルでGrad-CAMを計算し、重ね合わせ画像を返す
///
/// 失敗は [`GradCamError`] の各種別で返し、パニックは
/// [`GradCamError::Computation`] に変換します。
pub fn compute_gradcam<B, M>(
    model: &M,
    image: &DynamicImage,
    target_layer: &str,
    settings: &OverlaySettings,
    device: &B::Device,
) -> Result<GradCamOutput>
where
    B: AutodiffBackend,
    M: LayeredClassifier<B>,
{
    catch_faults("Grad-CAM", GradCamError::Computation, || {
        run_gradcam(model, image, target_layer, settings, device)
    })
}

fn run_gradcam<B, M>(
    model: &M,
    image: &DynamicImage,
    target_layer: &str,
    settings: &OverlaySettings,
    device: &B::Device,
) -> Result<GradCamOutput>
where
    B: AutodiffBackend,
    M: LayeredClassifier<B>,
{
    tracing::info!("Grad-CAM を開始します");

    let input_size = model.input_size();
    let input = preprocess::<B>(image, input_size, device).map_err(|e| {
        tracing::error!("前処理に失敗しました: {}", e);
        e
    })?;

    // 予測とクラス選択
    let probs = model.predict(input.clone());
    let probabilities = tensor_to_vec(probs.slice([0..1]))?;
    if probabilities.len() != model.num_classes() {
        return Err(GradCamError::Computation(format!(
            "クラス確率の数が {} です (期待: {})",
            probabilities.len(),
            model.num_classes()
        )));
    }
    let class_idx = predicted_class(&probabilities)
        .ok_or_else(|| GradCamError::Computation("クラス確率が空です".to_string()))?;
    tracing::info!("  - 予測クラス: {} (確率 {:.4})", class_idx, probabilities[class_idx]);

    let layer = resolve_target_layer(model.layers(), target_layer)
        .map_err(|e| {
            tracing::error!("{}", e);
            e
        })?
        .clone();
    tracing::debug!("  - 対象レイヤー: {} (#{})", layer.name, layer.index);

    // 活性化を葉として切り離し、そこから出力までを再計算して微分
    let activation = model.activation(&layer, input)?.detach().require_grad();
    let replayed = model.predict_from(&layer, activation.clone())?;
    let score = replayed.slice([0..1, class_idx..class_idx + 1]).sum();
    let grads = score.backward();

    let activation_inner = activation.clone().inner();
    let gradient = match activation.grad(&grads) {
        Some(gradient) => gradient,
        None => {
            tracing::warn!("レイヤー '{}' への勾配がありません。0として扱います", layer.name);
            activation_inner.zeros_like()
        }
    };

    let map = weighted_activation_map(activation_inner, gradient);
    let heatmap = Heatmap::from_tensor(map)?.normalize();
    tracing::debug!(
        "  - ヒートマップ: {}x{}{}",
        heatmap.width(),
        heatmap.height(),
        if heatmap.is_uniform() { " (一様)" } else { "" }
    );

    let visualizer = Visualizer::new(settings.clone());
    let overlay = visualizer.visualize(image, &heatmap, input_size as u32)?;

    tracing::info!("Grad-CAM 生成完了");
    Ok(GradCamOutput {
        overlay,
        predicted_class: class_idx,
        probabilities,
        layer_name: layer.name,
        heatmap,
    })
}

/// 設定に従ってモデルを読み込み、Grad-CAMを計算
///
/// 呼び出しのたびにモデルをディスクから読み込みます。
pub fn generate(config: &AppConfig, image: &DynamicImage, target_layer: &str) -> Result<GradCamOutput> {
    match runtime::initialize(config) {
        #[cfg(feature = "gpu")]
        DeviceType::Wgpu => generate_with::<GpuBackend>(config, image, target_layer, &Default::default()),
        // gpu フィーチャー無しでは Wgpu は CPU に解決済み
        #[cfg(not(feature = "gpu"))]
        DeviceType::Wgpu => generate_with::<CpuBackend>(config, image, target_layer, &Default::default()),
        DeviceType::Cpu => generate_with::<CpuBackend>(config, image, target_layer, &Default::default()),
    }
}

fn generate_with<B: AutodiffBackend>(
    config: &AppConfig,
    image: &DynamicImage,
    target_layer: &str,
    device: &B::Device,
) -> Result<GradCamOutput> {
    let provider = ModelProvider::new(config.model.clone());
    let model = catch_faults("モデル読み込み", GradCamError::ModelUnavailable, || {
        provider.load::<B>(device).map_err(GradCamError::from)
    })
    .map_err(|e| {
        tracing::error!("{}", e);
        e
    })?;

    compute_gradcam(&model, image, target_layer, &config.overlay, device)
}

/// 既定の設定ファイル（無ければデフォルト設定）でGrad-CAMを生成
///
/// 失敗時はログを出して `None` を返します。
pub fn grad_cam(image: &DynamicImage, target_layer: &str) -> Option<RgbImage> {
    grad_cam_with_config(&AppConfig::load_or_default(), image, target_layer)
}

/// 指定した設定でGrad-CAMを生成（失敗時は `None`）
pub fn grad_cam_with_config(config: &AppConfig, image: &DynamicImage, target_layer: &str) -> Option<RgbImage> {
    match generate(config, image, target_layer) {
        Ok(output) => Some(output.overlay),
        Err(e) => {
            tracing::error!("Grad-CAM 生成エラー: {}", e);
            None
        }
    }
}
