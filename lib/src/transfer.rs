//! The optimization loop: gradient descent applied directly to the output
//! image's pixels, with the assembled pipeline as the loss instrument.

use crate::model::StyleModel;
use crate::session::{ProgressUpdate, TransferProgress};
use crate::vgg::FeatureExtractor;
use crate::{Error, Parameters};
use tch::nn::OptimizerConfig;
use tch::{nn, no_grad, Tensor};

/// Numerical-stability epsilon for the Adam denominator. Unusually large
/// on purpose: it damps the first steps at a pixel-scale learning rate.
const ADAM_EPS: f64 = 1e-1;

/// Progress is reported after every this many completed steps.
const REPORT_EVERY: i64 = 50;

/// Optimizes a copy of `input_img` against the content/style targets and
/// returns it. The initial image is typically the content image itself.
pub(crate) fn run_style_transfer(
    extractor: &FeatureExtractor,
    content_img: &Tensor,
    style_img: &Tensor,
    input_img: &Tensor,
    params: &Parameters,
    progress: &mut Option<Box<dyn TransferProgress>>,
) -> Result<Tensor, Error> {
    let mut model = StyleModel::assemble(
        extractor,
        content_img,
        style_img,
        &params.content_layers,
        &params.style_layers,
    )?;

    // The image is the only trainable variable; the extractor's own
    // parameters and the captured targets stay frozen.
    let vs = nn::VarStore::new(extractor.device());
    let mut input = vs.root().var_copy("img", input_img);
    let mut opt = nn::Adam { eps: ADAM_EPS, ..Default::default() }
        .build(&vs, params.learning_rate)?;

    // `step <= steps` runs budget + 1 passes; a budget of 0 still
    // performs one full cycle.
    let mut step = 0;
    while step <= params.steps {
        // Clamp before the forward pass so the optimizer always reasons
        // about a valid image rather than drifting out of range.
        no_grad(|| {
            let _ = input.clamp_(0., 1.);
        });

        opt.zero_grad();
        model.forward(&input);

        let style_score = model.style_score();
        let content_score = model.content_score();
        let loss = &style_score * params.style_weight + &content_score * params.content_weight;
        loss.backward();
        opt.step();

        step += 1;
        if step % REPORT_EVERY == 0 {
            if let Some(progress) = progress.as_deref_mut() {
                progress.update(ProgressUpdate {
                    image: &input,
                    step,
                    total_steps: params.steps,
                    style_score: f64::try_from(&style_score)?,
                    content_score: f64::try_from(&content_score)?,
                });
            }
        }
    }

    // A last correction
    no_grad(|| {
        let _ = input.clamp_(0., 1.);
    });

    Ok(input.detach())
}
