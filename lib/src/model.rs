//! The measurement pipeline: the extractor's layers in their original
//! order with a normalization stage prepended, loss taps spliced in after
//! the requested layers, and everything past the last tap trimmed off.

use crate::vgg::{FeatureExtractor, Layer, LayerKind, IMAGENET_MEAN, IMAGENET_STD};
use crate::Error;
use tch::{Device, Reduction, Tensor};

/// Channel-correlation statistic of a `[1, C, H, W]` feature map: the
/// `C x C` matrix of inner products between flattened channels, divided
/// by the element count so the values do not depend on the spatial
/// extent. This is what "style" means operationally.
pub(crate) fn gram_matrix(m: &Tensor) -> Tensor {
    let size = m.size();
    let (ch, n) = (size[0] * size[1], size[2] * size[3]);
    let f = m.view([ch, n]);
    let g = f.matmul(&f.tr());
    g / (ch * n)
}

/// Rescales `[0, 1]` images into the statistics the pretrained extractor
/// was trained on, broadcasting per-channel mean/std over the spatial
/// dimensions. No gradient flows into the constants.
#[cfg_attr(test, derive(Debug))]
pub(crate) struct Normalization {
    mean: Tensor,
    std: Tensor,
}

impl Normalization {
    fn new(mean: &[f32; 3], std: &[f32; 3], device: Device) -> Self {
        Self {
            mean: Tensor::from_slice(mean).view([3, 1, 1]).to_device(device),
            std: Tensor::from_slice(std).view([3, 1, 1]).to_device(device),
        }
    }

    fn forward(&self, xs: &Tensor) -> Tensor {
        (xs - &self.mean) / &self.std
    }
}

/// Measurement stage recording the mean-squared error between the live
/// feature map and a frozen target, passing its input through unchanged.
#[cfg_attr(test, derive(Debug))]
pub(crate) struct ContentLoss {
    target: Tensor,
    loss: Option<Tensor>,
}

impl ContentLoss {
    fn new(target: &Tensor) -> Self {
        Self { target: target.detach(), loss: None }
    }

    fn forward(&mut self, xs: &Tensor) -> Tensor {
        self.loss = Some(xs.mse_loss(&self.target, Reduction::Mean));
        xs.shallow_clone()
    }
}

/// Like [`ContentLoss`], but both target and live values go through the
/// gram statistic first. The target descriptor is computed once and
/// frozen at construction.
#[cfg_attr(test, derive(Debug))]
pub(crate) struct StyleLoss {
    target: Tensor,
    loss: Option<Tensor>,
}

impl StyleLoss {
    fn new(target: &Tensor) -> Self {
        Self { target: gram_matrix(target).detach(), loss: None }
    }

    fn forward(&mut self, xs: &Tensor) -> Tensor {
        self.loss = Some(gram_matrix(xs).mse_loss(&self.target, Reduction::Mean));
        xs.shallow_clone()
    }
}

/// One stage of the assembled pipeline. Backbone stages borrow the frozen
/// extractor read-only; taps are owned by the pipeline itself.
#[cfg_attr(test, derive(Debug))]
pub(crate) enum Stage<'a> {
    Normalization(Normalization),
    Backbone(&'a Layer),
    Content(ContentLoss),
    Style(StyleLoss),
}

impl Stage<'_> {
    fn is_tap(&self) -> bool {
        matches!(self, Self::Content(_) | Self::Style(_))
    }

    fn forward(&mut self, xs: &Tensor) -> Tensor {
        match self {
            Self::Normalization(norm) => norm.forward(xs),
            Self::Backbone(layer) => layer.forward(xs),
            Self::Content(tap) => tap.forward(xs),
            Self::Style(tap) => tap.forward(xs),
        }
    }
}

fn forward_stages(stages: &mut [(String, Stage<'_>)], input: &Tensor) -> Tensor {
    stages
        .iter_mut()
        .fold(input.shallow_clone(), |xs, (_, stage)| stage.forward(&xs))
}

/// The assembled measurement pipeline plus the positions of its loss taps.
///
/// Lives only for the duration of one transfer run; the captured targets
/// are discarded with it.
#[cfg_attr(test, derive(Debug))]
pub(crate) struct StyleModel<'a> {
    stages: Vec<(String, Stage<'a>)>,
    content_taps: Vec<usize>,
    style_taps: Vec<usize>,
    device: Device,
}

impl<'a> StyleModel<'a> {
    /// Walks the extractor's layers in order, naming each one, splicing a
    /// loss tap in after every requested tap point with its target
    /// captured through the pipeline built so far, and finally trimming
    /// every stage past the last tap.
    pub fn assemble(
        extractor: &'a FeatureExtractor,
        content_img: &Tensor,
        style_img: &Tensor,
        content_layers: &[String],
        style_layers: &[String],
    ) -> Result<Self, Error> {
        let device = extractor.device();
        let norm = Normalization::new(&IMAGENET_MEAN, &IMAGENET_STD, device);
        let mut stages = vec![("norm".to_owned(), Stage::Normalization(norm))];
        let mut content_taps = Vec::new();
        let mut style_taps = Vec::new();

        // The index increments on convolutions only, so a convolution and
        // the activation/pooling that follow it share the same index.
        let mut conv_idx = 0usize;
        for (position, layer) in extractor.layers().iter().enumerate() {
            let name = match layer.kind() {
                LayerKind::Convolution => {
                    conv_idx += 1;
                    format!("conv_{}", conv_idx)
                }
                LayerKind::Activation => format!("relu_{}", conv_idx),
                LayerKind::Pooling => format!("pool_{}", conv_idx),
                LayerKind::ChannelNorm => format!("bn_{}", conv_idx),
                kind @ LayerKind::Linear => {
                    return Err(Error::UnsupportedLayer { position, kind: kind.name() })
                }
            };

            stages.push((name.clone(), Stage::Backbone(layer)));

            if content_layers.contains(&name) {
                let target = tch::no_grad(|| forward_stages(&mut stages, content_img));
                let tap = Stage::Content(ContentLoss::new(&target));
                stages.push((format!("content_loss_{}", conv_idx), tap));
                content_taps.push(stages.len() - 1);
            }

            if style_layers.contains(&name) {
                let target = tch::no_grad(|| forward_stages(&mut stages, style_img));
                let tap = Stage::Style(StyleLoss::new(&target));
                stages.push((format!("style_loss_{}", conv_idx), tap));
                style_taps.push(stages.len() - 1);
            }
        }

        // Everything past the final measurement point is dead weight.
        let keep = stages
            .iter()
            .rposition(|(_, stage)| stage.is_tap())
            .map_or(1, |last| last + 1);
        stages.truncate(keep);

        Ok(Self { stages, content_taps, style_taps, device })
    }

    /// Runs one forward pass. The produced value is only returned for the
    /// caller to discard; the point is that every tap refreshes its
    /// recorded loss.
    pub fn forward(&mut self, xs: &Tensor) -> Tensor {
        forward_stages(&mut self.stages, xs)
    }

    /// Sum of the style-tap losses from the most recent forward pass.
    pub fn style_score(&self) -> Tensor {
        self.score(&self.style_taps)
    }

    /// Sum of the content-tap losses from the most recent forward pass.
    pub fn content_score(&self) -> Tensor {
        self.score(&self.content_taps)
    }

    fn score(&self, taps: &[usize]) -> Tensor {
        let mut total = Tensor::from(0f32).to_device(self.device);
        for &idx in taps {
            let loss = match &self.stages[idx].1 {
                Stage::Content(tap) => tap.loss.as_ref(),
                Stage::Style(tap) => tap.loss.as_ref(),
                _ => None,
            };
            if let Some(loss) = loss {
                total = total + loss;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgg::{FeatureExtractor, Layer};
    use tch::{kind::FLOAT_CPU, nn, Device, Kind};

    fn conv(p: nn::Path<'_>, c_in: i64, c_out: i64) -> nn::Conv2D {
        let cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
        nn::conv2d(p, c_in, c_out, 3, cfg)
    }

    fn tiny_extractor() -> FeatureExtractor {
        tch::manual_seed(42);
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = {
            let root = vs.root();
            vec![
                Layer::Conv(conv(&root / "0", 3, 4)),
                Layer::Relu,
                Layer::Conv(conv(&root / "2", 4, 4)),
                Layer::Relu,
                Layer::MaxPool { kernel: 2 },
                Layer::Conv(conv(&root / "5", 4, 8)),
                Layer::Relu,
            ]
        };
        FeatureExtractor::from_layers(vs, layers)
    }

    fn owning(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn gram_is_symmetric_and_deterministic() {
        tch::manual_seed(7);
        let m = Tensor::rand([1, 4, 6, 6], FLOAT_CPU);

        let g1 = gram_matrix(&m);
        let g2 = gram_matrix(&m);

        assert_eq!(g1.size(), &[4, 4]);
        assert!(g1.allclose(&g1.tr(), 1e-12, 1e-12, false));
        assert!(g1.allclose(&g2, 0., 0., false));
    }

    #[test]
    fn losses_vanish_at_the_target() {
        tch::manual_seed(7);
        let feature = Tensor::rand([1, 4, 5, 5], FLOAT_CPU);

        let mut content = ContentLoss::new(&feature);
        let passed = content.forward(&feature);
        assert!(f64::try_from(content.loss.unwrap()).unwrap() < 1e-10);
        assert!(passed.allclose(&feature, 0., 0., false));

        let mut style = StyleLoss::new(&feature);
        style.forward(&feature);
        assert!(f64::try_from(style.loss.unwrap()).unwrap() < 1e-10);
    }

    #[test]
    fn assembly_names_and_truncates() {
        let extractor = tiny_extractor();
        tch::manual_seed(7);
        let content_img = Tensor::rand([1, 3, 8, 8], FLOAT_CPU);
        let style_img = Tensor::rand([1, 3, 8, 8], FLOAT_CPU);

        let model = StyleModel::assemble(
            &extractor,
            &content_img,
            &style_img,
            &owning(&["conv_2"]),
            &owning(&["conv_1", "conv_2"]),
        )
        .unwrap();

        let names: Vec<&str> = model.stages.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            &["norm", "conv_1", "style_loss_1", "conv_2", "content_loss_2", "style_loss_2"]
        );
        assert!(model.stages.last().unwrap().1.is_tap());
        assert_eq!(model.content_taps.len(), 1);
        assert_eq!(model.style_taps.len(), 2);
    }

    #[test]
    fn assembly_is_deterministic() {
        let extractor = tiny_extractor();
        tch::manual_seed(7);
        let content_img = Tensor::rand([1, 3, 8, 8], FLOAT_CPU);
        let style_img = Tensor::rand([1, 3, 8, 8], FLOAT_CPU);
        let content_layers = owning(&["conv_2"]);
        let style_layers = owning(&["conv_1", "conv_3"]);

        let a = StyleModel::assemble(
            &extractor, &content_img, &style_img, &content_layers, &style_layers,
        )
        .unwrap();
        let b = StyleModel::assemble(
            &extractor, &content_img, &style_img, &content_layers, &style_layers,
        )
        .unwrap();

        let names = |m: &StyleModel<'_>| -> Vec<String> {
            m.stages.iter().map(|(n, _)| n.clone()).collect()
        };
        assert_eq!(names(&a), names(&b));
        assert_eq!(a.content_taps, b.content_taps);
        assert_eq!(a.style_taps, b.style_taps);
    }

    #[test]
    fn unsupported_layer_aborts_assembly() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = {
            let root = vs.root();
            vec![
                Layer::Conv(conv(&root / "0", 3, 4)),
                Layer::Linear(nn::linear(&root / "1", 4, 2, Default::default())),
            ]
        };
        let extractor = FeatureExtractor::from_layers(vs, layers);
        let img = Tensor::zeros([1, 3, 8, 8], FLOAT_CPU);

        let err = StyleModel::assemble(&extractor, &img, &img, &owning(&["conv_1"]), &[])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedLayer { position: 1, kind: "linear" }));
    }

    #[test]
    fn scores_sum_the_tap_losses() {
        let extractor = tiny_extractor();
        tch::manual_seed(9);
        let content_img = Tensor::rand([1, 3, 8, 8], FLOAT_CPU);
        let style_img = Tensor::rand([1, 3, 8, 8], FLOAT_CPU);

        let mut model = StyleModel::assemble(
            &extractor,
            &content_img,
            &style_img,
            &owning(&["conv_2"]),
            &owning(&["conv_1", "conv_2", "conv_3"]),
        )
        .unwrap();

        // Feeding the content image back in zeroes the content score but
        // not the style score.
        model.forward(&content_img);
        let content_score = f64::try_from(model.content_score()).unwrap();
        let style_score = f64::try_from(model.style_score()).unwrap();
        assert!(content_score < 1e-10);
        assert!(style_score > 0.);

        let out = model.forward(&style_img);
        assert_eq!(out.kind(), Kind::Float);
        assert!(f64::try_from(model.style_score()).unwrap() < 1e-10);
    }
}
