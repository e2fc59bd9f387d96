//! ResNet-18 backbone with a replaceable classification head
//!
//! A standard ResNet-18 feature extractor (four stages of two basic blocks)
//! followed by global average pooling and a linear head sized for the target
//! label set. Backbone weights can be saved and loaded independently of the
//! head, which is how a multi-class run transfers its features to the
//! single-attribute runs. Named layers can be frozen for fine-tuning.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig,
};
use burn::nn::{
    BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::Distribution;
use std::path::Path;

use crate::model::ClassifierModel;
use crate::utils::error::{PipelineError, Result};

/// Layer names accepted by [`BackboneClassifier::freeze_layers`].
pub const FREEZE_LAYER_NAMES: [&str; 6] =
    ["conv1", "bn1", "layer1", "layer2", "layer3", "layer4"];

/// 1x1 convolution matching the residual path when shape changes.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        Self { conv, bn }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with a residual connection.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        let downsample = if stride != 1 || in_channels != out_channels {
            Some(Downsample::new(in_channels, out_channels, stride, device))
        } else {
            None
        };

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        self.relu.forward(out + residual)
    }
}

/// ResNet-18 feature extractor producing `[batch, 512, H/32, W/32]` maps.
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
}

fn make_layer<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<BasicBlock<B>> {
    vec![
        BasicBlock::new(in_channels, out_channels, stride, device),
        BasicBlock::new(out_channels, out_channels, 1, device),
    ]
}

impl<B: Backend> ResNetBackbone<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(64).init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
            layer1: make_layer(64, 64, 1, device),
            layer2: make_layer(64, 128, 2, device),
            layer3: make_layer(128, 256, 2, device),
            layer4: make_layer(256, 512, 2, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let mut x = self.maxpool.forward(x);
        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }
        x
    }

    /// Freeze the named layers by disabling gradient tracking on them.
    pub fn freeze_layers(mut self, layers: &[String]) -> Result<Self> {
        for name in layers {
            match name.as_str() {
                "conv1" => self.conv1 = self.conv1.no_grad(),
                "bn1" => self.bn1 = self.bn1.no_grad(),
                "layer1" => self.layer1 = self.layer1.no_grad(),
                "layer2" => self.layer2 = self.layer2.no_grad(),
                "layer3" => self.layer3 = self.layer3.no_grad(),
                "layer4" => self.layer4 = self.layer4.no_grad(),
                other => {
                    return Err(PipelineError::InvalidInput(format!(
                        "unknown layer '{}', expected one of: {}",
                        other,
                        FREEZE_LAYER_NAMES.join(", ")
                    )))
                }
            }
        }
        Ok(self)
    }
}

/// Configuration for [`BackboneClassifier`].
#[derive(Config, Debug)]
pub struct BackboneClassifierConfig {
    /// Number of output classes
    #[config(default = "18")]
    pub num_classes: usize,
}

/// ResNet-18 backbone with global pooling and a linear head.
#[derive(Module, Debug)]
pub struct BackboneClassifier<B: Backend> {
    backbone: ResNetBackbone<B>,
    global_pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> BackboneClassifier<B> {
    /// Create a classifier with a freshly initialized head.
    ///
    /// The head weight is Xavier-initialized; its bias is drawn uniformly
    /// from `±1/sqrt(512)` to match the fan-in of the feature vector.
    pub fn new(config: &BackboneClassifierConfig, device: &B::Device) -> Self {
        let backbone = ResNetBackbone::new(device);
        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let mut head = LinearConfig::new(512, config.num_classes)
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device);
        let bound = 1.0 / (512f64).sqrt();
        head.bias = head.bias.map(|bias| {
            bias.map(|tensor| {
                Tensor::random(
                    tensor.shape(),
                    Distribution::Uniform(-bound, bound),
                    &tensor.device(),
                )
                .require_grad()
            })
        });

        Self {
            backbone,
            global_pool,
            head,
            num_classes: config.num_classes,
        }
    }

    /// Replace the backbone weights with a previously saved record.
    pub fn load_backbone(mut self, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = CompactRecorder::new();
        self.backbone = self
            .backbone
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| {
                PipelineError::Model(format!(
                    "failed to load backbone weights from '{}': {:?}",
                    path.display(),
                    e
                ))
            })?;
        Ok(self)
    }

    /// Save only the backbone weights, head excluded.
    pub fn save_backbone(&self, path: &Path) -> Result<()> {
        let recorder = CompactRecorder::new();
        self.backbone
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| {
                PipelineError::Model(format!(
                    "failed to save backbone weights to '{}': {:?}",
                    path.display(),
                    e
                ))
            })
    }

    /// Freeze named backbone layers for fine-tuning.
    pub fn freeze_layers(mut self, layers: &[String]) -> Result<Self> {
        self.backbone = self.backbone.freeze_layers(layers)?;
        Ok(self)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        let pooled = self.global_pool.forward(features);

        let [batch_size, channels, _, _] = pooled.dims();
        let flat = pooled.reshape([batch_size, channels]);
        self.head.forward(flat)
    }
}

impl<B: Backend> ClassifierModel<B> for BackboneClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        BackboneClassifier::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::optim::GradientsParams;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;
    type TestAutodiffBackend = burn::backend::Autodiff<NdArray>;

    #[test]
    fn test_basic_block_shapes() {
        let device = Default::default();
        let same = BasicBlock::<TestBackend>::new(64, 64, 1, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 64, 8, 8], &device);
        assert_eq!(same.forward(input).dims(), [1, 64, 8, 8]);

        let down = BasicBlock::<TestBackend>::new(64, 128, 2, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 64, 8, 8], &device);
        assert_eq!(down.forward(input).dims(), [1, 128, 4, 4]);
    }

    #[test]
    fn test_backbone_feature_shape() {
        let device = Default::default();
        let backbone = ResNetBackbone::<TestBackend>::new(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
        assert_eq!(backbone.forward(input).dims(), [1, 512, 2, 2]);
    }

    #[test]
    fn test_classifier_forward_shape() {
        let device = Default::default();
        let model =
            BackboneClassifier::<TestBackend>::new(&BackboneClassifierConfig::new(), &device);
        assert_eq!(ClassifierModel::num_classes(&model), 18);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        assert_eq!(model.forward(input).dims(), [2, 18]);
    }

    #[test]
    fn test_freeze_accepts_known_layers() {
        let device = Default::default();
        let model =
            BackboneClassifier::<TestBackend>::new(&BackboneClassifierConfig::new(), &device);
        let layers: Vec<String> = vec!["conv1".into(), "bn1".into(), "layer1".into()];
        let frozen = model.freeze_layers(&layers).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
        assert_eq!(frozen.forward(input).dims(), [1, 18]);
    }

    fn gradient_count(model: &BackboneClassifier<TestAutodiffBackend>) -> usize {
        let device = Default::default();
        let input = Tensor::<TestAutodiffBackend, 4>::random(
            [1, 3, 64, 64],
            Distribution::Default,
            &device,
        );
        let loss = model.forward(input).sum();
        let grads = loss.backward();
        GradientsParams::from_grads(grads, model).len()
    }

    #[test]
    fn test_frozen_layers_receive_no_gradients() {
        let device = Default::default();
        let config = BackboneClassifierConfig::new().with_num_classes(3);

        let model = BackboneClassifier::<TestAutodiffBackend>::new(&config, &device);
        let full = gradient_count(&model);

        let layers: Vec<String> = FREEZE_LAYER_NAMES.iter().map(|s| s.to_string()).collect();
        let frozen = model.freeze_layers(&layers).unwrap();
        // Only the head weight and bias are left trainable.
        assert_eq!(gradient_count(&frozen), 2);
        assert!(full > 2);
    }

    #[test]
    fn test_freeze_rejects_unknown_layer() {
        let device = Default::default();
        let model =
            BackboneClassifier::<TestBackend>::new(&BackboneClassifierConfig::new(), &device);
        let result = model.freeze_layers(&["fc7".to_string()]);
        match result {
            Err(PipelineError::InvalidInput(msg)) => {
                assert!(msg.contains("fc7"));
                assert!(msg.contains("layer4"));
            }
            other => panic!("expected invalid input error, got {:?}", other),
        }
    }

    #[test]
    fn test_backbone_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model =
            BackboneClassifier::<TestBackend>::new(&BackboneClassifierConfig::new(), &device);

        let path = dir.path().join("backbone");
        model.save_backbone(&path).unwrap();

        let config = BackboneClassifierConfig::new().with_num_classes(3);
        let restored = BackboneClassifier::<TestBackend>::new(&config, &device)
            .load_backbone(&path, &device)
            .unwrap();
        assert_eq!(ClassifierModel::num_classes(&restored), 3);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
        assert_eq!(restored.forward(input).dims(), [1, 3]);
    }
}
