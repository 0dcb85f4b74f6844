//! モデルの探索・読み込み・自己診断

use anyhow::{Context, Result};
use burn::{
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::{Path, PathBuf};

use crate::ml::{Classifier, ConvMlpRecord, LayeredClassifier};
use crate::model::{
    load_model_with_metadata, log_metadata_info, save_model_with_metadata, ModelMetadata, ModelSettings,
};

/// 学習済みモデルの読み込みを担当
pub struct ModelProvider {
    settings: ModelSettings,
}

impl ModelProvider {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    /// 候補パスを先頭から探索し、最初に存在したものを返す
    pub fn locate(&self) -> Option<PathBuf> {
        self.settings
            .model_paths
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// 候補パスからモデルを読み込み、自己診断まで行う
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<Classifier<B>> {
        let model_path = self.locate().ok_or_else(|| {
            anyhow::anyhow!(
                "モデルが見つかりません (探索先: {})",
                self.settings.model_paths.join(", ")
            )
        })?;

        tracing::info!("モデルを読み込み中: {}", model_path.display());
        let model = self.load_from_path::<B>(&model_path, device)?;

        self.validate(&model, device)
            .context("読み込んだモデルが検証に失敗しました")?;

        tracing::info!("モデル読み込み完了: {}", model_path.display());
        tracing::info!("  - レイヤー数: {}", model.layers().len());
        tracing::info!("  - パラメータ数: {}", model.num_params());
        Ok(model)
    }

    /// 指定パスからモデルを読み込む（自己診断なし）
    pub fn load_from_path<B: Backend>(&self, path: &Path, device: &B::Device) -> Result<Classifier<B>> {
        if !path.exists() {
            anyhow::bail!("ファイルが見つかりません: {}", path.display());
        }

        let (metadata, model_binary) = load_model_with_metadata(path)?;
        metadata
            .architecture
            .validate()
            .context(format!("アーキテクチャが不正です: {}", metadata.name))?;

        let model = metadata.architecture.init::<B>(device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record: ConvMlpRecord<B> = Recorder::<B>::load(&recorder, model_binary, device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        log_metadata_info(&metadata);
        Ok(model.load_record(record))
    }

    /// 構造の自己診断
    ///
    /// - 対象レイヤーが無い場合は警告のみ（フォールバックに任せる）
    /// - 乱数入力で推論し、出力クラス数が設定と一致することを確認
    pub fn validate<B: Backend>(&self, model: &Classifier<B>, device: &B::Device) -> Result<()> {
        let target = &self.settings.target_layer;
        if model.get_layer(target).is_none() {
            tracing::warn!("Grad-CAM用のレイヤー '{}' が見つかりません", target);
            tracing::warn!("  利用可能なconvレイヤー: {:?}", model.conv_layer_names());
        }

        let size = model.input_size();
        if size != self.settings.input_size {
            anyhow::bail!(
                "モデルの入力サイズが {}x{} です (期待: {}x{})",
                size,
                size,
                self.settings.input_size,
                self.settings.input_size
            );
        }

        let channels = model.config().input_channels;
        let mut rng = StdRng::seed_from_u64(self.settings.validation_seed);
        let data: Vec<f32> = (0..channels * size * size).map(|_| rng.gen::<f32>()).collect();
        let input = Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([1, channels, size, size]);

        let [_, num_classes] = model.predict(input).dims();
        if num_classes != self.settings.num_classes {
            anyhow::bail!(
                "モデルのクラス数が {} です (期待: {})",
                num_classes,
                self.settings.num_classes
            );
        }

        tracing::info!("モデル検証OK: {}クラス, 入力 {}x{}x{}", num_classes, size, size, channels);
        Ok(())
    }
}

/// モデルをメタデータと共に保存
pub fn save_classifier<B: Backend>(output_path: &Path, name: &str, model: &Classifier<B>) -> Result<PathBuf> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = Recorder::<B>::record(&recorder, model.record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    let layer_names = model.layers().iter().map(|layer| layer.name.clone()).collect();
    let metadata = ModelMetadata::new(name, model.config().clone(), layer_names);
    save_model_with_metadata(output_path, &metadata, &model_binary)
}
