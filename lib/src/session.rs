use crate::transfer::run_style_transfer;
use crate::utils::{load_image, ImageSource};
use crate::vgg::FeatureExtractor;
use crate::{errors, Dims, Error, Parameters, StylizedImage};
use std::path::{Path, PathBuf};
use tch::{Device, Tensor};

/// Style transfer session.
///
/// Calling `run()` will synthesize the stylized image and return it,
/// consuming the session in the process. You can provide a
/// `TransferProgress` implementation to periodically get updates with the
/// image being optimized and the current style/content scores.
///
/// # Example
/// ```no_run
/// let session = style_transfer::Session::builder()
///     .content(&"imgs/dancing.jpg")
///     .style(&"imgs/picasso.jpg")
///     .vgg_weights("vgg19.ot")
///     .build().expect("failed to build session");
///
/// let stylized = session.run(None).expect("style transfer failed");
/// stylized.save("my_stylized_img.png").expect("failed to save image");
/// ```
#[cfg_attr(test, derive(Debug))]
pub struct Session {
    extractor: FeatureExtractor,
    content: Tensor,
    style: Tensor,
    params: Parameters,
}

impl Session {
    /// Creates a new session with default parameters.
    pub fn builder<'a>() -> SessionBuilder<'a> {
        SessionBuilder::default()
    }

    /// Runs the optimization, starting from a copy of the content image,
    /// and outputs the stylized image.
    pub fn run(
        self,
        mut progress: Option<Box<dyn TransferProgress>>,
    ) -> Result<StylizedImage, Error> {
        let output = run_style_transfer(
            &self.extractor,
            &self.content,
            &self.style,
            &self.content,
            &self.params,
            &mut progress,
        )?;

        Ok(StylizedImage::new(output))
    }
}

/// Builds a session by setting parameters and adding input images, calling
/// `build` will check all of the provided inputs to verify that the style
/// transfer will provide valid output
#[derive(Default)]
pub struct SessionBuilder<'a> {
    content: Option<ImageSource<'a>>,
    style: Option<ImageSource<'a>>,
    extractor: Option<FeatureExtractor>,
    weights: Option<PathBuf>,
    params: Parameters,
}

impl<'a> SessionBuilder<'a> {
    /// Creates a new `SessionBuilder`, can also be created via
    /// `Session::builder()`
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content image, whose spatial structure the output
    /// preserves.
    pub fn content<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.content = Some(img.into());
        self
    }

    /// Sets the style image, whose texture and color statistics the
    /// output imitates.
    pub fn style<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.style = Some(img.into());
        self
    }

    /// Builds the feature extractor from a pretrained VGG19 weights file
    /// (`.ot`). Ignored if an extractor is provided directly.
    pub fn vgg_weights<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.weights = Some(path.as_ref().to_path_buf());
        self
    }

    /// Provides the feature extractor directly. Its device takes
    /// precedence over `device()`.
    pub fn extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// The optimization step budget. Note that the loop runs one extra
    /// pass beyond the budget, so a budget of 0 still optimizes once.
    ///
    /// Default: 300
    pub fn steps(mut self, count: i64) -> Self {
        self.params.steps = count;
        self
    }

    /// Relative strength of style matching.
    ///
    /// Default: 1000000
    pub fn style_weight(mut self, value: f64) -> Self {
        self.params.style_weight = value;
        self
    }

    /// Relative strength of content matching.
    ///
    /// Default: 1
    pub fn content_weight(mut self, value: f64) -> Self {
        self.params.content_weight = value;
        self
    }

    /// The optimizer's learning rate, applied directly to pixel values.
    ///
    /// Default: 0.1
    pub fn learning_rate(mut self, value: f64) -> Self {
        self.params.learning_rate = value;
        self
    }

    /// Overwrite incoming images sizes. The content and style images must
    /// resolve to the same size, so this is required whenever they do not
    /// already match.
    pub fn resize_input(mut self, dims: Dims) -> Self {
        self.params.resize_input = Some(dims);
        self
    }

    /// The device tensors are placed on and the optimization runs on.
    ///
    /// Default: the first CUDA device if one is available, CPU otherwise.
    pub fn device(mut self, device: Device) -> Self {
        self.params.device = device;
        self
    }

    /// The layer names after which content losses are measured.
    ///
    /// Default: `conv_4`
    pub fn content_layers<S: Into<String>, I: IntoIterator<Item = S>>(
        mut self,
        layers: I,
    ) -> Self {
        self.params.content_layers = layers.into_iter().map(|l| l.into()).collect();
        self
    }

    /// The layer names after which style losses are measured.
    ///
    /// Default: `conv_1` through `conv_5`
    pub fn style_layers<S: Into<String>, I: IntoIterator<Item = S>>(mut self, layers: I) -> Self {
        self.params.style_layers = layers.into_iter().map(|l| l.into()).collect();
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or
    /// input images were specified.
    pub fn build(self) -> Result<Session, Error> {
        self.check_parameters_validity()?;

        let extractor = match (self.extractor, self.weights) {
            (Some(extractor), _) => extractor,
            (None, Some(weights)) => FeatureExtractor::vgg19(weights, self.params.device)?,
            (None, None) => return Err(Error::NoExtractor),
        };
        let device = extractor.device();

        let content = match self.content {
            Some(src) => load_image(src, self.params.resize_input, device)?,
            None => return Err(Error::MissingImage("content")),
        };
        let style = match self.style {
            Some(src) => load_image(src, self.params.resize_input, device)?,
            None => return Err(Error::MissingImage("style")),
        };

        let (content_size, style_size) = (content.size(), style.size());
        if content_size != style_size {
            return Err(Error::SizeMismatch(errors::SizeMismatch {
                content: (content_size[3], content_size[2]),
                style: (style_size[3], style_size[2]),
            }));
        }

        Ok(Session { extractor, content, style, params: self.params })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        if self.params.steps < 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.,
                max: f32::INFINITY,
                value: self.params.steps as f32,
                name: "steps",
            }));
        }

        if self.params.style_weight < 0. {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.,
                max: f32::INFINITY,
                value: self.params.style_weight as f32,
                name: "style-weight",
            }));
        }

        if self.params.content_weight < 0. {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.,
                max: f32::INFINITY,
                value: self.params.content_weight as f32,
                name: "content-weight",
            }));
        }

        if self.params.learning_rate <= 0. {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.,
                max: f32::INFINITY,
                value: self.params.learning_rate as f32,
                name: "learning-rate",
            }));
        }

        if self.params.content_layers.is_empty() && self.params.style_layers.is_empty() {
            return Err(Error::NoLossLayers);
        }

        Ok(())
    }
}

/// The current state of the optimization
pub struct ProgressUpdate<'a> {
    /// The pixel tensor being optimized, `[1, 3, H, W]` with values in
    /// `[0, 1]`
    pub image: &'a Tensor,
    /// Completed optimization steps
    pub step: i64,
    /// The step budget for the whole run
    pub total_steps: i64,
    /// Sum of the style-tap losses, unweighted
    pub style_score: f64,
    /// Sum of the content-tap losses, unweighted
    pub content_score: f64,
}

/// Allows the optimization loop to update external callers with the
/// current progress of the style transfer
pub trait TransferProgress {
    fn update(&mut self, info: ProgressUpdate<'_>);
}

impl<G> TransferProgress for G
where
    G: FnMut(ProgressUpdate<'_>) + Send,
{
    fn update(&mut self, info: ProgressUpdate<'_>) {
        self(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgg::Layer;
    use tch::nn;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> ImageSource<'static> {
        ImageSource::Image(image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb(rgb),
        )))
    }

    fn cpu_extractor() -> FeatureExtractor {
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = {
            let root = vs.root();
            let cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
            vec![
                Layer::Conv(nn::conv2d(&root / "0", 3, 4, 3, cfg)),
                Layer::Relu,
                Layer::Conv(nn::conv2d(&root / "2", 4, 4, 3, cfg)),
                Layer::Relu,
            ]
        };
        FeatureExtractor::from_layers(vs, layers)
    }

    #[test]
    fn rejects_negative_weights() {
        let err = Session::builder()
            .content(solid(8, 8, [255, 0, 0]))
            .style(solid(8, 8, [0, 255, 0]))
            .extractor(cpu_extractor())
            .style_weight(-1.)
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::InvalidRange(_)));
    }

    #[test]
    fn rejects_missing_extractor() {
        let err = Session::builder()
            .content(solid(8, 8, [255, 0, 0]))
            .style(solid(8, 8, [0, 255, 0]))
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::NoExtractor));
    }

    #[test]
    fn rejects_empty_tap_sets() {
        let err = Session::builder()
            .content(solid(8, 8, [255, 0, 0]))
            .style(solid(8, 8, [0, 255, 0]))
            .extractor(cpu_extractor())
            .content_layers(Vec::<String>::new())
            .style_layers(Vec::<String>::new())
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::NoLossLayers));
    }

    #[test]
    fn rejects_mismatched_sizes() {
        let err = Session::builder()
            .content(solid(8, 8, [255, 0, 0]))
            .style(solid(16, 8, [0, 255, 0]))
            .extractor(cpu_extractor())
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::SizeMismatch(_)));
    }

    #[test]
    fn resize_reconciles_mismatched_sizes() {
        let session = Session::builder()
            .content(solid(8, 8, [255, 0, 0]))
            .style(solid(16, 12, [0, 255, 0]))
            .extractor(cpu_extractor())
            .resize_input(Dims::new(8, 8))
            .build()
            .unwrap();

        assert_eq!(session.content.size(), session.style.size());
        assert_eq!(session.content.size(), &[1, 3, 8, 8]);
    }
}
