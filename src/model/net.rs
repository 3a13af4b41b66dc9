//! Binary REAL/FAKE classifier.
//!
//! A plain conv stack: each stage is a 3x3 convolution (padding 1), ReLU and
//! a 2x2 max pool. Global average pooling makes the head independent of the
//! input resolution.

use candle_core::{DType, Device, Module, ModuleT, Tensor, Var};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Dropout, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

/// Number of output classes (REAL, FAKE).
pub const NUM_CLASSES: usize = 2;

/// Shape of a [`DeepfakeNet`]; stored in every checkpoint so the network can
/// be rebuilt before its weights are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Square input resolution
    pub input_size: usize,
    /// Output channels of each conv stage
    pub channels: Vec<usize>,
    pub hidden: usize,
    pub dropout: f32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            channels: vec![32, 64, 128, 256],
            hidden: 512,
            dropout: 0.5,
        }
    }
}

impl NetConfig {
    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }
}

pub struct DeepfakeNet {
    features: Vec<Conv2d>,
    fc1: Linear,
    dropout: Dropout,
    fc2: Linear,
}

impl DeepfakeNet {
    pub fn new(config: &NetConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_config = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };

        let features_vb = vb.pp("features");
        let mut features = Vec::with_capacity(config.channels.len());
        let mut in_channels = 3;
        for (i, &out_channels) in config.channels.iter().enumerate() {
            features.push(conv2d(in_channels, out_channels, 3, conv_config, features_vb.pp(i))?);
            in_channels = out_channels;
        }

        let classifier_vb = vb.pp("classifier");
        let fc1 = linear(in_channels, config.hidden, classifier_vb.pp("fc1"))?;
        let fc2 = linear(config.hidden, NUM_CLASSES, classifier_vb.pp("fc2"))?;

        Ok(Self {
            features,
            fc1,
            dropout: Dropout::new(config.dropout),
            fc2,
        })
    }
}

impl ModuleT for DeepfakeNet {
    /// `xs`: (batch, 3, H, W) normalized images. Returns (batch, 2) logits.
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for conv in &self.features {
            xs = conv.forward(&xs)?.relu()?.max_pool2d(2)?;
        }

        // Global average pool: (B, C, h, w) -> (B, C)
        let xs = xs.mean((2, 3))?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward_t(&xs, train)?;
        self.fc2.forward(&xs)
    }
}

/// A network together with the variables that back it.
pub struct Classifier {
    varmap: VarMap,
    net: DeepfakeNet,
    config: NetConfig,
    device: Device,
}

impl Classifier {
    /// Build a freshly initialized classifier.
    pub fn new(config: NetConfig, device: &Device) -> candle_core::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = DeepfakeNet::new(&config, vb)?;
        Ok(Self {
            varmap,
            net,
            config,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Raw class scores for a batch.
    pub fn logits(&self, images: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.net.forward_t(images, train)
    }

    /// Variables sorted by name.
    pub fn named_vars(&self) -> candle_core::Result<Vec<(String, Var)>> {
        named_vars(&self.varmap)
    }

    pub fn parameter_count(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }
}

pub fn named_vars(varmap: &VarMap) -> candle_core::Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_string()))?;
    let mut vars: Vec<(String, Var)> = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vars)
}

#[cfg(test)]
pub(crate) fn tiny_config() -> NetConfig {
    NetConfig {
        input_size: 16,
        channels: vec![4, 8],
        hidden: 8,
        dropout: 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logits_shape() {
        let device = Device::Cpu;
        let classifier = Classifier::new(tiny_config(), &device).unwrap();
        let xs = Tensor::zeros((3, 3, 16, 16), DType::F32, &device).unwrap();
        let logits = classifier.logits(&xs, false).unwrap();
        assert_eq!(logits.dims(), &[3, NUM_CLASSES]);
    }

    #[test]
    fn test_variable_names() {
        let classifier = Classifier::new(tiny_config(), &Device::Cpu).unwrap();
        let names: Vec<String> = classifier.named_vars().unwrap().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"features.0.weight".to_string()));
        assert!(names.contains(&"features.1.bias".to_string()));
        assert!(names.contains(&"classifier.fc2.weight".to_string()));
        assert_eq!(names.len(), 8);

        // conv: 3*4*9+4, 4*8*9+8; fc1: 8*8+8; fc2: 8*2+2
        assert_eq!(classifier.parameter_count(), 112 + 296 + 72 + 18);
    }

    #[test]
    fn test_eval_forward_is_deterministic() {
        let device = Device::Cpu;
        let classifier = Classifier::new(tiny_config(), &device).unwrap();
        let xs = Tensor::randn(0f32, 1f32, (2, 3, 16, 16), &device).unwrap();
        let a: Vec<Vec<f32>> = classifier.logits(&xs, false).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = classifier.logits(&xs, false).unwrap().to_vec2().unwrap();
        assert_eq!(a, b);
    }
}
