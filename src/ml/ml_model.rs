//! 機械学習モデルの共通定義
//!
//! 単一チャネル画像を3クラスに分類するCNN（畳み込みブロック + MLP）と
//! 関連する設定を提供します。各レイヤーは名前で参照できます。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use std::collections::HashSet;

use crate::error::{GradCamError, Result as GradCamResult};
use crate::ml::layers::{LayerInfo, LayerKind, LayeredClassifier};

/// クラス数
pub const NUM_CLASSES: usize = 3;

/// 入力画像サイズ（正方形、単一チャネル）
pub const IMAGE_SIZE: usize = 512;

/// Grad-CAMの対象とする畳み込み層の既定名
pub const TARGET_LAYER: &str = "conv10_thisone";

/// 畳み込みブロック設定
#[derive(Config, Debug, PartialEq)]
pub struct ConvBlockConfig {
    /// レイヤー名（Grad-CAMの対象指定に使用）
    pub name: String,
    /// 出力チャネル数
    pub out_channels: usize,
    /// 2x2 Max Pooling を後段に付けるか
    #[config(default = false)]
    pub pool: bool,
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// 畳み込みブロック（入力側から順に）
    pub blocks: Vec<ConvBlockConfig>,
    /// 分類クラス数
    #[config(default = 3)]
    pub num_classes: usize,
    /// 入力チャネル数
    #[config(default = 1)]
    pub input_channels: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 512)]
    pub image_size: usize,
    /// 中間全結合層のユニット数
    #[config(default = 64)]
    pub hidden_size: usize,
}

impl ClassifierConfig {
    /// 既定アーキテクチャ（conv1 ～ conv10_thisone の10層）
    ///
    /// 512 -> 5回のプーリングで conv10_thisone の出力は 16x16。
    pub fn conv_mlp() -> Self {
        let blocks = vec![
            ConvBlockConfig::new("conv1".to_string(), 16),
            ConvBlockConfig::new("conv2".to_string(), 16).with_pool(true),
            ConvBlockConfig::new("conv3".to_string(), 32),
            ConvBlockConfig::new("conv4".to_string(), 32).with_pool(true),
            ConvBlockConfig::new("conv5".to_string(), 64),
            ConvBlockConfig::new("conv6".to_string(), 64).with_pool(true),
            ConvBlockConfig::new("conv7".to_string(), 128),
            ConvBlockConfig::new("conv8".to_string(), 128).with_pool(true),
            ConvBlockConfig::new("conv9".to_string(), 128).with_pool(true),
            ConvBlockConfig::new(TARGET_LAYER.to_string(), 128),
        ];
        Self::new(blocks)
    }

    /// 構成の整合性を検証
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            anyhow::bail!("畳み込みブロックが1つもありません");
        }
        if self.num_classes == 0 {
            anyhow::bail!("クラス数が0です");
        }

        let mut seen = HashSet::new();
        for layer in layer_table(self).0 {
            if !seen.insert(layer.name.clone()) {
                anyhow::bail!("レイヤー名が重複しています: {}", layer.name);
            }
        }

        let pools = self.blocks.iter().filter(|b| b.pool).count();
        let feature_map_size = self.image_size >> pools;
        if feature_map_size == 0 {
            anyhow::bail!(
                "入力サイズが小さすぎます: {} ({}回のプーリングには最低{}が必要)",
                self.image_size,
                pools,
                1usize << pools
            );
        }
        Ok(())
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        let mut in_channels = self.input_channels;
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            blocks.push(ConvBlock {
                // 3x3 (same padding, stride 1)
                conv: Conv2dConfig::new([in_channels, block.out_channels], [3, 3])
                    .with_stride([1, 1])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
                pool: block
                    .pool
                    .then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()),
            });
            in_channels = block.out_channels;
        }

        let network = ConvMlp {
            blocks,
            gap: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense: LinearConfig::new(in_channels, self.hidden_size).init(device),
            predictions: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        };

        let (layers, stages) = layer_table(self);
        Classifier {
            network,
            config: self.clone(),
            layers,
            stages,
        }
    }
}

/// 3x3 Conv + ReLU（+ 任意の Max Pooling）
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
}

/// 畳み込み特徴抽出 + MLP 分類ヘッド
///
/// # アーキテクチャ
/// - {Conv 3x3 (same padding) + ReLU [+ MaxPool 2x2]} x N
/// - Global Average Pooling
/// - FC: C -> hidden + ReLU
/// - FC: hidden -> num_classes
/// - Softmax
#[derive(Module, Debug)]
pub struct ConvMlp<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    gap: AdaptiveAvgPool2d,
    dense: Linear<B>,
    predictions: Linear<B>,
    activation: Relu,
}

/// 空間レイヤーの実行単位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Conv(usize),
    Pool(usize),
}

/// 設定からレイヤー一覧と空間レイヤーの実行順を作る
///
/// 空間レイヤーは一覧の先頭に定義順で並ぶため、
/// `LayerInfo::index` がそのまま `stages` の添字になります。
fn layer_table(config: &ClassifierConfig) -> (Vec<LayerInfo>, Vec<Stage>) {
    let mut layers = Vec::new();
    let mut stages = Vec::new();
    let mut pool_count = 0;

    for (block_idx, block) in config.blocks.iter().enumerate() {
        layers.push(LayerInfo::new(block.name.clone(), LayerKind::Conv2d, layers.len()));
        stages.push(Stage::Conv(block_idx));
        if block.pool {
            pool_count += 1;
            layers.push(LayerInfo::new(
                format!("max_pooling2d_{}", pool_count),
                LayerKind::MaxPool2d,
                layers.len(),
            ));
            stages.push(Stage::Pool(block_idx));
        }
    }

    layers.push(LayerInfo::new("global_average_pooling2d", LayerKind::GlobalAvgPool, layers.len()));
    layers.push(LayerInfo::new("dense", LayerKind::Dense, layers.len()));
    layers.push(LayerInfo::new("predictions", LayerKind::Dense, layers.len()));

    (layers, stages)
}

/// 名前付きレイヤーを持つ分類器
#[derive(Debug)]
pub struct Classifier<B: Backend> {
    network: ConvMlp<B>,
    config: ClassifierConfig,
    layers: Vec<LayerInfo>,
    stages: Vec<Stage>,
}

impl<B: Backend> Classifier<B> {
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// 保存済みの重みを反映
    pub fn load_record(self, record: ConvMlpRecord<B>) -> Self {
        Self {
            network: self.network.load_record(record),
            ..self
        }
    }

    /// 重みを取り出す（保存用）
    pub fn record(&self) -> ConvMlpRecord<B> {
        self.network.clone().into_record()
    }

    /// 総パラメータ数
    pub fn num_params(&self) -> usize {
        self.network.num_params()
    }

    /// 名前に "conv" を含むレイヤーの一覧
    pub fn conv_layer_names(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter(|layer| layer.name.contains("conv"))
            .map(|layer| layer.name.as_str())
            .collect()
    }

    /// 順伝播（ロジット）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, size, size]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.run_stages(0..self.stages.len(), images);
        self.head(x)
    }

    fn run_stages(&self, range: std::ops::Range<usize>, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for stage in &self.stages[range] {
            x = match *stage {
                Stage::Conv(idx) => {
                    let x = self.network.blocks[idx].conv.forward(x);
                    self.network.activation.forward(x)
                }
                Stage::Pool(idx) => match &self.network.blocks[idx].pool {
                    Some(pool) => pool.forward(x),
                    None => x,
                },
            };
        }
        x
    }

    fn head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, _, _] = x.dims();

        // Global Average Pooling -> Flatten
        let x = self.network.gap.forward(x);
        let x = x.reshape([batch_size, channels]);

        // FC1 + ReLU
        let x = self.network.dense.forward(x);
        let x = self.network.activation.forward(x);

        // FC2
        self.network.predictions.forward(x)
    }

    /// 空間レイヤーの実行範囲の終端
    fn stage_end(&self, layer: &LayerInfo) -> GradCamResult<usize> {
        if layer.kind.is_spatial() && layer.index < self.stages.len() {
            Ok(layer.index + 1)
        } else {
            Err(GradCamError::LayerResolution(format!(
                "レイヤー '{}' は空間方向の活性化を持ちません",
                layer.name
            )))
        }
    }
}

impl<B: Backend> LayeredClassifier<B> for Classifier<B> {
    fn input_size(&self) -> usize {
        self.config.image_size
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(input), 1)
    }

    fn activation(&self, layer: &LayerInfo, input: Tensor<B, 4>) -> GradCamResult<Tensor<B, 4>> {
        let end = self.stage_end(layer)?;
        Ok(self.run_stages(0..end, input))
    }

    fn predict_from(&self, layer: &LayerInfo, activation: Tensor<B, 4>) -> GradCamResult<Tensor<B, 2>> {
        let start = self.stage_end(layer)?;
        let x = self.run_stages(start..self.stages.len(), activation);
        Ok(softmax(self.head(x), 1))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    pub type TestBackend = Autodiff<NdArray>;

    /// テスト用の小さな構成（512 -> 64）
    pub fn tiny_config() -> ClassifierConfig {
        ClassifierConfig::new(vec![
            ConvBlockConfig::new("conv1".to_string(), 4).with_pool(true),
            ConvBlockConfig::new("conv2".to_string(), 4).with_pool(true),
            ConvBlockConfig::new("conv3_last".to_string(), 8).with_pool(true),
        ])
        .with_hidden_size(8)
    }

    #[test]
    fn test_default_architecture() {
        let config = ClassifierConfig::conv_mlp();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_classes, NUM_CLASSES);
        assert_eq!(config.image_size, IMAGE_SIZE);
        assert_eq!(config.blocks.last().map(|b| b.name.as_str()), Some(TARGET_LAYER));
    }

    #[test]
    fn test_layer_table_order() {
        let (layers, stages) = layer_table(&tiny_config());
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "conv1",
                "max_pooling2d_1",
                "conv2",
                "max_pooling2d_2",
                "conv3_last",
                "max_pooling2d_3",
                "global_average_pooling2d",
                "dense",
                "predictions",
            ]
        );
        assert_eq!(stages.len(), 6);
        for (i, layer) in layers.iter().enumerate() {
            assert_eq!(layer.index, i);
        }
    }

    #[test]
    fn test_validate_rejects_duplicates_and_tiny_inputs() {
        let duplicated = ClassifierConfig::new(vec![
            ConvBlockConfig::new("conv".to_string(), 2),
            ConvBlockConfig::new("conv".to_string(), 2),
        ]);
        assert!(duplicated.validate().is_err());

        let tiny = tiny_config().with_image_size(4);
        assert!(tiny.validate().is_err());

        assert!(ClassifierConfig::new(vec![]).validate().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = tiny_config().with_image_size(32).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([2, 1, 32, 32], &device);

        let probs = model.predict(input.clone());
        assert_eq!(probs.dims(), [2, 3]);

        let layer = model.get_layer("conv2").cloned().unwrap();
        let activation = model.activation(&layer, input).unwrap();
        assert_eq!(activation.dims(), [2, 4, 16, 16]);

        let replayed = model.predict_from(&layer, activation).unwrap();
        assert_eq!(replayed.dims(), [2, 3]);
    }

    #[test]
    fn test_predict_from_matches_predict() {
        let device = Default::default();
        let model = tiny_config().with_image_size(32).init::<TestBackend>(&device);
        let data: Vec<f32> = (0..32 * 32).map(|i| (i % 17) as f32 / 17.0).collect();
        let input = Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &device)
            .reshape([1, 1, 32, 32]);

        let direct = model.predict(input.clone()).into_data().to_vec::<f32>().unwrap();
        let layer = model.get_layer("max_pooling2d_1").cloned().unwrap();
        let activation = model.activation(&layer, input).unwrap();
        let replayed = model
            .predict_from(&layer, activation)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for (a, b) in direct.iter().zip(replayed.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        let sum: f32 = direct.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_non_spatial_layer_is_rejected() {
        let device = Default::default();
        let model = tiny_config().with_image_size(32).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 1, 32, 32], &device);

        let dense = model.get_layer("dense").cloned().unwrap();
        assert!(matches!(
            model.activation(&dense, input.clone()),
            Err(GradCamError::LayerResolution(_))
        ));
        let features = Tensor::<TestBackend, 4>::zeros([1, 8, 4, 4], &device);
        assert!(matches!(
            model.predict_from(&dense, features),
            Err(GradCamError::LayerResolution(_))
        ));

        // 範囲外の添字を持つレイヤー情報も拒否
        let stray = LayerInfo::new("conv_stray", LayerKind::Conv2d, 99);
        assert!(model.activation(&stray, input).is_err());
    }

    #[test]
    fn test_conv_layer_names() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        assert_eq!(model.conv_layer_names(), vec!["conv1", "conv2", "conv3_last"]);
        assert!(model.num_params() > 0);
    }
}
