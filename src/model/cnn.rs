//! Compact CNN trained from scratch
//!
//! Three convolution blocks with max pooling and dropout, global average
//! pooling and a single linear head. Convolutions use valid padding, so the
//! network accepts any input size large enough to survive the two poolings.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig,
};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::prelude::*;

use crate::model::ClassifierModel;

/// Configuration for [`CnnClassifier`].
#[derive(Config, Debug)]
pub struct CnnClassifierConfig {
    /// Number of output classes
    #[config(default = "18")]
    pub num_classes: usize,

    /// Dropout probability after the pooled conv blocks
    #[config(default = "0.25")]
    pub dropout: f64,
}

/// Convolution followed by ReLU, with optional max pooling and dropout.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    relu: Relu,
    pool: Option<MaxPool2d>,
    dropout: Option<Dropout>,
}

impl<B: Backend> ConvBlock<B> {
    /// `pool_dropout` enables 2x2 max pooling followed by dropout with the
    /// given probability.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        pool_dropout: Option<f64>,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .init(device);
        let pool = pool_dropout
            .map(|_| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());
        let dropout = pool_dropout.map(|prob| DropoutConfig::new(prob).init());

        Self {
            conv,
            relu: Relu::new(),
            pool,
            dropout,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

/// The from-scratch classifier.
#[derive(Module, Debug)]
pub struct CnnClassifier<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> CnnClassifier<B> {
    pub fn new(config: &CnnClassifierConfig, device: &B::Device) -> Self {
        let conv1 = ConvBlock::new(3, 32, 7, None, device);
        let conv2 = ConvBlock::new(32, 64, 3, Some(config.dropout), device);
        let conv3 = ConvBlock::new(64, 128, 3, Some(config.dropout), device);
        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc = LinearConfig::new(128, config.num_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            global_pool,
            fc,
            num_classes: config.num_classes,
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.global_pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);
        self.fc.forward(x)
    }
}

impl<B: Backend> ClassifierModel<B> for CnnClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        CnnClassifier::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_config_defaults() {
        let config = CnnClassifierConfig::new();
        assert_eq!(config.num_classes, 18);
        assert!((config.dropout - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = CnnClassifier::<TestBackend>::new(&CnnClassifierConfig::new(), &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 96, 128], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 18]);
    }

    #[test]
    fn test_forward_shape_single_attribute() {
        let device = Default::default();
        let config = CnnClassifierConfig::new().with_num_classes(3);
        let model = CnnClassifier::<TestBackend>::new(&config, &device);
        assert_eq!(ClassifierModel::num_classes(&model), 3);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 96, 128], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [1, 3]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let config = CnnClassifierConfig::new().with_num_classes(5);
        let model = CnnClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let probs = model.forward_softmax(input);
        let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
