use std::fmt;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) value: f32,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

#[derive(Debug)]
pub struct SizeMismatch {
    pub(crate) content: (i64, i64),
    pub(crate) style: (i64, i64),
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the content size ({}x{}) must match the style size ({}x{})",
            self.content.0, self.content.1, self.style.0, self.style.1
        )
    }
}

#[derive(Debug)]
pub enum Error {
    /// An error in the image library occurred, eg failed to load/save
    Image(image::ImageError),
    /// An error in the tensor backend occurred, eg failed to load weights
    Tch(tch::TchError),
    /// An input parameter had an invalid range specified
    InvalidRange(InvalidRange),
    /// The content and style images must resolve to identical tensor shapes
    SizeMismatch(SizeMismatch),
    /// The feature extractor contained a layer kind the measurement
    /// pipeline cannot host
    UnsupportedLayer {
        position: usize,
        kind: &'static str,
    },
    /// Io is notoriously error free with no problems, but we cover it just in case!
    Io(std::io::Error),
    /// The user specified an image format we don't support as the output
    UnsupportedOutputFormat(String),
    /// The session builder was given neither a feature extractor nor a
    /// weights file to build one from
    NoExtractor,
    /// The session builder was missing one of its two input images
    MissingImage(&'static str),
    /// No content or style tap layers were requested, so there is nothing
    /// to optimize against
    NoLossLayers,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::Tch(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ie) => write!(f, "{}", ie),
            Self::Tch(te) => write!(f, "{}", te),
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::SizeMismatch(sm) => write!(f, "{}", sm),
            Self::UnsupportedLayer { position, kind } => write!(
                f,
                "the feature extractor's layer {} is a {} layer, which the pipeline does not support",
                position, kind
            ),
            Self::Io(io) => write!(f, "{}", io),
            Self::UnsupportedOutputFormat(fmt_name) => {
                write!(f, "the output format '{}' is not supported", fmt_name)
            }
            Self::NoExtractor => write!(
                f,
                "a feature extractor, or a weights file to build one from, must be provided"
            ),
            Self::MissingImage(which) => {
                write!(f, "no {} image was provided to the session builder", which)
            }
            Self::NoLossLayers => write!(
                f,
                "at least 1 content or style layer must be selected to measure losses at"
            ),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(ie: image::ImageError) -> Self {
        Self::Image(ie)
    }
}

impl From<tch::TchError> for Error {
    fn from(te: tch::TchError) -> Self {
        Self::Tch(te)
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::Io(io)
    }
}
