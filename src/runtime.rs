//! 実行時の初期化（ログ・計算バックエンド）

use std::sync::OnceLock;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::model::{AppConfig, DeviceType};

/// CPU（NdArray）バックエンド。勾配計算のため Autodiff で包む
pub type CpuBackend = Autodiff<NdArray>;

/// GPU（WGPU）バックエンド
#[cfg(feature = "gpu")]
pub type GpuBackend = Autodiff<burn_wgpu::Wgpu>;

static TRACING: OnceLock<()> = OnceLock::new();

/// ログ出力を初期化（何度呼んでも1回だけ）
///
/// `RUST_LOG` が無ければ info レベルで出力します。
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // 既に別のサブスクライバーが登録されていれば何もしない
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .try_init();
    });
}

/// ログを初期化し、実際に使うデバイスを決める
pub fn initialize(config: &AppConfig) -> DeviceType {
    init_tracing();
    let device = resolve_device(config.device_type);
    tracing::info!("計算デバイス: {}", device);
    device
}

/// 要求されたデバイスを、ビルドで使えるものに解決
pub fn resolve_device(requested: DeviceType) -> DeviceType {
    match requested {
        DeviceType::Wgpu if !cfg!(feature = "gpu") => {
            tracing::warn!("gpu フィーチャーが無効なため CPU (NdArray) を使用します");
            DeviceType::Cpu
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_kept() {
        assert_eq!(resolve_device(DeviceType::Cpu), DeviceType::Cpu);
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_wgpu_falls_back_without_gpu_feature() {
        assert_eq!(resolve_device(DeviceType::Wgpu), DeviceType::Cpu);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        let config = AppConfig::default();
        assert_eq!(initialize(&config), DeviceType::Cpu);
    }
}
