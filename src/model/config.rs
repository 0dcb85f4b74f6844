//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデルの探索パス、オーバーレイ設定などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ml::{IMAGE_SIZE, NUM_CLASSES, TARGET_LAYER};

/// 既定のモデルファイル名
pub const DEFAULT_MODEL_FILE: &str = "conv_MLP_84.tar.gz";

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド（`gpu` フィーチャーが必要）
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルファイルの候補パス（先頭から順に探索）
    pub model_paths: Vec<String>,
    /// Grad-CAMの対象レイヤー名
    pub target_layer: String,
    /// 入力画像サイズ（正方形）
    pub input_size: usize,
    /// 分類クラス数
    pub num_classes: usize,
    /// 読み込み時の自己診断に使う乱数シード
    #[serde(default = "default_validation_seed")]
    pub validation_seed: u64,
}

fn default_validation_seed() -> u64 {
    42
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_paths: vec![
                format!("models/{}", DEFAULT_MODEL_FILE),       // ルートから
                format!("../models/{}", DEFAULT_MODEL_FILE),    // src/ から
                format!("../../models/{}", DEFAULT_MODEL_FILE), // さらに下の階層から
            ],
            target_layer: TARGET_LAYER.to_string(),
            input_size: IMAGE_SIZE,
            num_classes: NUM_CLASSES,
            validation_seed: default_validation_seed(),
        }
    }
}

/// オーバーレイ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// 表示キャンバスの一辺（ピクセル）
    pub display_size: u32,
    /// ヒートマップの重み（元画像は 1 - alpha）
    pub heatmap_alpha: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            display_size: 512,
            heatmap_alpha: 0.6,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// オーバーレイ設定
    #[serde(default)]
    pub overlay: OverlaySettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    tracing::warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== アプリケーション設定 ===");
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("モデル候補パス: {}", self.model.model_paths.join(", "));
        tracing::info!("対象レイヤー: {}", self.model.target_layer);
        tracing::info!("入力サイズ: {}x{}", self.model.input_size, self.model.input_size);
        tracing::info!("分類クラス数: {}", self.model.num_classes);
        tracing::info!(
            "表示サイズ: {}x{} (ヒートマップ重み {})",
            self.overlay.display_size,
            self.overlay.display_size,
            self.overlay.heatmap_alpha
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.model.num_classes, 3);
        assert_eq!(config.model.input_size, 512);
        assert_eq!(config.model.target_layer, "conv10_thisone");
        assert_eq!(config.overlay.display_size, 512);
        assert!((config.overlay.heatmap_alpha - 0.6).abs() < f32::EPSILON);
        assert_eq!(
            config.model.model_paths,
            vec![
                "models/conv_MLP_84.tar.gz".to_string(),
                "../models/conv_MLP_84.tar.gz".to_string(),
                "../../models/conv_MLP_84.tar.gz".to_string(),
            ]
        );
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.model_paths, deserialized.model.model_paths);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let deserialized: AppConfig = serde_json::from_str(r#"{ "device_type": "Wgpu" }"#).unwrap();
        assert_eq!(deserialized.device_type, DeviceType::Wgpu);
        assert_eq!(deserialized.model.target_layer, "conv10_thisone");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.model.target_layer = "conv9".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default_from(&path);
        assert_eq!(loaded.model.target_layer, "conv9");
    }

    #[test]
    fn test_broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_or_default_from(&path);
        assert_eq!(loaded.model.target_layer, "conv10_thisone");
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
