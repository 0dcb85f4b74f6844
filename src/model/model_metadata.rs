//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//! 重みだけではモデルを復元できないため、アーキテクチャ（各レイヤーの
//! 名前とチャネル数）もメタデータに含めます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::ClassifierConfig;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// モデル名（例: "conv_MLP_84"）
    pub name: String,

    /// アーキテクチャ（ブロック構成、クラス数、入力サイズ）
    pub architecture: ClassifierConfig,

    /// 全レイヤー名（定義順）
    /// 参考情報。読み込み時はアーキテクチャから再構築される
    #[serde(default)]
    pub layer_names: Vec<String>,

    /// モデルの作成時刻（ISO8601形式）
    pub created_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(name: impl Into<String>, architecture: ClassifierConfig, layer_names: Vec<String>) -> Self {
        let created_at = chrono::Local::now().to_rfc3339();

        Self {
            name: name.into(),
            architecture,
            layer_names,
            created_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_architecture() {
        let metadata = ModelMetadata::new("conv_MLP_84", ClassifierConfig::conv_mlp(), vec![]);
        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(restored.name, "conv_MLP_84");
        assert_eq!(restored.architecture.blocks, metadata.architecture.blocks);
        assert_eq!(restored.architecture.num_classes, 3);
        assert_eq!(restored.created_at, metadata.created_at);
    }

    #[test]
    fn test_missing_layer_names_default_to_empty() {
        let json = r#"{
            "name": "m",
            "architecture": {
                "blocks": [ { "name": "conv1", "out_channels": 2, "pool": false } ],
                "num_classes": 3,
                "input_channels": 1,
                "image_size": 512,
                "hidden_size": 8
            },
            "created_at": "2024-01-01T00:00:00+00:00"
        }"#;
        let metadata = ModelMetadata::from_json_string(json).unwrap();
        assert!(metadata.layer_names.is_empty());
        assert_eq!(metadata.architecture.image_size, 512);
        assert!(!metadata.architecture.blocks[0].pool);
    }
}
