// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `style-transfer` is a light API for neural style transfer: given a
//! content image and a style image, it synthesizes an output image that
//! keeps the content image's spatial structure while adopting the style
//! image's texture and color statistics, measured through a frozen
//! pretrained VGG19 feature extractor.
//!
//! First, you build a `Session` via a `SessionBuilder`, which follows the
//! builder pattern. Calling `build` on the `SessionBuilder` loads all of
//! the input images, constructs the feature extractor and checks for
//! various errors.
//!
//! `Session` has a `run()` method that assembles the measurement pipeline
//! and optimizes the output image's pixels directly, returning the result
//! as a `StylizedImage` which you can save, stream, or inspect.
//!
//! ## Usage
//!
//! ```no_run
//! // Create a new session with default parameters
//! let session = style_transfer::Session::builder()
//!     // Specify the two input images
//!     .content(&"imgs/dancing.jpg")
//!     .style(&"imgs/picasso.jpg")
//!     // Point at the pretrained VGG19 weights
//!     .vgg_weights("vgg19.ot")
//!     // Build the session
//!     .build().expect("failed to build session");
//!
//! // Synthesize the stylized image
//! let stylized = session.run(None).expect("style transfer failed");
//!
//! // Save it to disk
//! stylized.save("my_stylized_img.png").expect("failed to save image");
//! ```
mod errors;
mod model;
mod transfer;
mod utils;
pub mod session;
pub mod vgg;

pub use image;
pub use tch;

use std::path::Path;
use tch::Tensor;

pub use errors::Error;
pub use session::{ProgressUpdate, Session, SessionBuilder, TransferProgress};
pub use utils::{load_dynamic_image, ImageSource};
pub use vgg::{FeatureExtractor, Layer, LayerKind};

/// Simple dimensions struct
#[derive(Copy, Clone)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Default content tap point: a single mid-depth convolution.
pub const DEFAULT_CONTENT_LAYERS: [&str; 1] = ["conv_4"];

/// Default style tap points: five convolutions spanning the shallow to
/// middle depths of the network.
pub const DEFAULT_STYLE_LAYERS: [&str; 5] = ["conv_1", "conv_2", "conv_3", "conv_4", "conv_5"];

#[cfg_attr(test, derive(Debug))]
struct Parameters {
    steps: i64,
    style_weight: f64,
    content_weight: f64,
    learning_rate: f64,
    resize_input: Option<Dims>,
    device: tch::Device,
    content_layers: Vec<String>,
    style_layers: Vec<String>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            steps: 300,
            style_weight: 1_000_000.0,
            content_weight: 1.0,
            learning_rate: 0.1,
            resize_input: None,
            device: tch::Device::cuda_if_available(),
            content_layers: DEFAULT_CONTENT_LAYERS.iter().map(|l| (*l).to_owned()).collect(),
            style_layers: DEFAULT_STYLE_LAYERS.iter().map(|l| (*l).to_owned()).collect(),
        }
    }
}

/// An image synthesized by a `Session::run()`
pub struct StylizedImage {
    tensor: Tensor,
}

impl StylizedImage {
    pub(crate) fn new(tensor: Tensor) -> Self {
        Self { tensor }
    }

    /// Saves the stylized image to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(parent_path)?;
        }

        self.to_image()?.save(path)?;
        Ok(())
    }

    /// Writes the stylized image to the specified stream
    pub fn write<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        let dyn_img = image::DynamicImage::ImageRgb8(self.to_image()?);
        Ok(dyn_img.write_to(writer, fmt)?)
    }

    /// Converts the result into an 8-bit RGB image
    pub fn to_image(&self) -> Result<image::RgbImage, Error> {
        utils::tensor_to_image(&self.tensor)
    }

    /// Returns the raw `[1, 3, H, W]` pixel tensor, values in `[0, 1]`
    pub fn into_tensor(self) -> Tensor {
        self.tensor
    }
}

impl AsRef<Tensor> for StylizedImage {
    fn as_ref(&self) -> &Tensor {
        &self.tensor
    }
}
