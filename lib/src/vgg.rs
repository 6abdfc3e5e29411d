//! The pretrained feature extractor used as a fixed perceptual measuring
//! instrument.
//!
//! The extractor is exposed as an ordered list of layers, each tagged
//! with its [`LayerKind`], which is the only contract the measurement
//! pipeline depends on. Pre-trained weights for [`FeatureExtractor::vgg19`]
//! can be downloaded from:
//! <https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg19.ot>

use crate::Error;
use std::path::Path;
use tch::{
    nn,
    nn::{Module, ModuleT},
    Device, Tensor,
};

/// Per-channel mean the pretrained network expects its input rescaled with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation matching [`IMAGENET_MEAN`].
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The kind of a single extractor layer, supplied as explicit metadata so
/// pipeline assembly never has to guess at a layer's runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Convolution,
    Activation,
    Pooling,
    ChannelNorm,
    Linear,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Convolution => "convolution",
            Self::Activation => "activation",
            Self::Pooling => "pooling",
            Self::ChannelNorm => "channel-normalization",
            Self::Linear => "linear",
        }
    }
}

/// One stage of the feature extractor.
///
/// The activation variant is functional rather than in-place: a loss tap
/// spliced in after a layer keeps a handle on that exact tensor, so no
/// later stage may overwrite it.
#[cfg_attr(test, derive(Debug))]
pub enum Layer {
    Conv(nn::Conv2D),
    Relu,
    MaxPool { kernel: i64 },
    ChannelNorm(nn::BatchNorm),
    Linear(nn::Linear),
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Conv(_) => LayerKind::Convolution,
            Self::Relu => LayerKind::Activation,
            Self::MaxPool { .. } => LayerKind::Pooling,
            Self::ChannelNorm(_) => LayerKind::ChannelNorm,
            Self::Linear(_) => LayerKind::Linear,
        }
    }

    /// Runs the layer in evaluation mode.
    pub fn forward(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Conv(conv) => conv.forward(xs),
            Self::Relu => xs.relu(),
            Self::MaxPool { kernel } => xs.max_pool2d_default(*kernel),
            Self::ChannelNorm(bn) => bn.forward_t(xs, false),
            Self::Linear(linear) => linear.forward(xs),
        }
    }
}

// Each list element contains multiple convolutions with some specified
// number of features followed by a single max-pool layer.
fn layers_e() -> Vec<Vec<i64>> {
    vec![
        vec![64, 64],
        vec![128, 128],
        vec![256, 256, 256, 256],
        vec![512, 512, 512, 512],
        vec![512, 512, 512, 512],
    ]
}

fn conv2d(p: nn::Path<'_>, c_in: i64, c_out: i64) -> nn::Conv2D {
    let conv2d_cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
    nn::conv2d(p, c_in, c_out, 3, conv2d_cfg)
}

fn features(p: &nn::Path<'_>, cfg: Vec<Vec<i64>>, batch_norm: bool) -> Vec<Layer> {
    let mut layers = Vec::new();
    let mut c_in = 3;
    for channels in cfg {
        for c_out in channels {
            // Variable paths reuse the running layer index so that the
            // published torchvision weight files line up.
            layers.push(Layer::Conv(conv2d(p / layers.len().to_string(), c_in, c_out)));
            if batch_norm {
                let bn = nn::batch_norm2d(p / layers.len().to_string(), c_out, Default::default());
                layers.push(Layer::ChannelNorm(bn));
            }
            layers.push(Layer::Relu);
            c_in = c_out;
        }
        layers.push(Layer::MaxPool { kernel: 2 });
    }
    layers
}

/// A frozen, pretrained convolutional network exposing its layers as an
/// ordered, kind-tagged list. Runs in evaluation mode; none of its
/// parameters ever receive gradient updates.
#[cfg_attr(test, derive(Debug))]
pub struct FeatureExtractor {
    vs: nn::VarStore,
    layers: Vec<Layer>,
}

impl FeatureExtractor {
    /// Builds the convolutional features of VGG19 and loads pretrained
    /// weights from the specified `.ot` file, freezing every parameter.
    pub fn vgg19<P: AsRef<Path>>(weights: P, device: Device) -> Result<Self, Error> {
        let mut vs = nn::VarStore::new(device);
        let layers = {
            let root = vs.root();
            let f = &root / "features";
            features(&f, layers_e(), false)
        };
        vs.load(weights)?;
        vs.freeze();
        Ok(Self { vs, layers })
    }

    /// Wraps an arbitrary ordered layer list whose variables live in `vs`.
    /// The store is frozen: the extractor is a measuring instrument, not
    /// something to train.
    pub fn from_layers(mut vs: nn::VarStore, layers: Vec<Layer>) -> Self {
        vs.freeze();
        Self { vs, layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }
}
