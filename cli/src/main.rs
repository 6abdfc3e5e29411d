use indicatif::{ProgressBar, ProgressStyle};
use structopt::StructOpt;

use std::path::PathBuf;
use style_transfer::{
    image::ImageOutputFormat as ImgFmt, tch::Device, Dims, Error, ProgressUpdate, Session,
    TransferProgress,
};

fn parse_size(input: &str) -> Result<Dims, std::num::ParseIntError> {
    let mut i = input.splitn(2, 'x');

    let x: u32 = i.next().unwrap_or("").parse()?;
    let y: u32 = match i.next() {
        Some(num) => num.parse()?,
        None => x,
    };
    Ok(Dims::new(x, y))
}

fn parse_img_fmt(input: &str) -> Result<ImgFmt, String> {
    let fmt = match input {
        "png" => ImgFmt::Png,
        "jpg" => ImgFmt::Jpeg(75),
        "bmp" => ImgFmt::Bmp,
        other => {
            return Err(format!(
                "image format `{}` not one of: 'png', 'jpg', 'bmp'",
                other
            ))
        }
    };

    Ok(fmt)
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Tweaks {
    /// The optimization step budget. The loop runs one extra pass beyond
    /// the budget, so even 0 optimizes once.
    #[structopt(long, default_value = "300")]
    steps: i64,
    /// Relative strength of style matching. Larger values trade content
    /// fidelity for texture fidelity.
    #[structopt(long, default_value = "1000000")]
    style_weight: f64,
    /// Relative strength of content matching
    #[structopt(long, default_value = "1")]
    content_weight: f64,
    /// The optimizer's learning rate, applied directly to pixel values
    #[structopt(long, default_value = "0.1")]
    learning_rate: f64,
    /// Layer name(s) to measure content losses after. Defaults to conv_4
    #[structopt(long = "content-layers")]
    content_layers: Vec<String>,
    /// Layer name(s) to measure style losses after. Defaults to conv_1
    /// through conv_5
    #[structopt(long = "style-layers")]
    style_layers: Vec<String>,
    /// Run on the CPU even if a CUDA device is available
    #[structopt(long)]
    cpu: bool,
    /// Don't draw the progress bar
    #[structopt(long)]
    no_progress: bool,
}

#[derive(StructOpt)]
#[structopt(
    name = "style-transfer",
    about = "Re-renders a content image with the texture statistics of a style image",
    rename_all = "kebab-case"
)]
struct Opt {
    /// Path to the image whose spatial structure is preserved
    #[structopt(long, parse(from_os_str))]
    content: PathBuf,
    /// Path to the image whose texture and color statistics are imitated
    #[structopt(long, parse(from_os_str))]
    style: PathBuf,
    /// Path to the pretrained VGG19 weights file (vgg19.ot)
    #[structopt(long, parse(from_os_str))]
    weights: PathBuf,
    /// Resize both input images, in `width x height`, or a single number
    /// for both dimensions. The two images must end up the same size.
    #[structopt(
        long,
        default_value = "128",
        parse(try_from_str = parse_size)
    )]
    size: Dims,
    /// The format to save the stylized image as.
    ///
    /// NOTE: this will only apply when stdout is specified via `-o -`, otherwise the image
    /// format is determined by the file extension of the path provided to `-o`
    #[structopt(
        long,
        default_value = "png",
        parse(try_from_str = parse_img_fmt)
    )]
    out_fmt: ImgFmt,
    /// The path to save the stylized image to, the file extension of the path determines
    /// the image format used. You may use `-` for stdout.
    #[structopt(long = "out", short, parse(from_os_str))]
    output_path: PathBuf,
    #[structopt(flatten)]
    tweaks: Tweaks,
}

fn main() {
    if let Err(e) = real_main() {
        if atty::is(atty::Stream::Stderr) {
            eprintln!("\x1b[31merror\x1b[0m: {}", e);
        } else {
            eprintln!("error: {}", e);
        }

        std::process::exit(1);
    }
}

fn real_main() -> Result<(), Error> {
    let args = Opt::from_args();

    // Check that the extension for the path supplied by the user is one of the ones we support
    {
        match args.output_path.extension().and_then(|ext| ext.to_str()) {
            Some("png") | Some("jpg") | Some("bmp") => {}
            None => {}
            Some(other) => return Err(Error::UnsupportedOutputFormat(other.to_owned())),
        }
    }

    let device = if args.tweaks.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };

    let mut sb = Session::builder()
        .content(&args.content)
        .style(&args.style)
        .vgg_weights(&args.weights)
        .resize_input(args.size)
        .device(device)
        .steps(args.tweaks.steps)
        .style_weight(args.tweaks.style_weight)
        .content_weight(args.tweaks.content_weight)
        .learning_rate(args.tweaks.learning_rate);

    if !args.tweaks.content_layers.is_empty() {
        sb = sb.content_layers(args.tweaks.content_layers.clone());
    }

    if !args.tweaks.style_layers.is_empty() {
        sb = sb.style_layers(args.tweaks.style_layers.clone());
    }

    let session = sb.build()?;

    let progress: Option<Box<dyn TransferProgress>> = if !args.tweaks.no_progress {
        Some(Box::new(ProgressLine::new(args.tweaks.steps)))
    } else {
        None
    };

    let stylized = session.run(progress)?;

    if args.output_path.to_str() == Some("-") {
        use std::io::Write;

        // The image encoder wants a seekable sink, so encode in memory first
        let mut encoded = std::io::Cursor::new(Vec::new());
        stylized.write(&mut encoded, args.out_fmt)?;

        let out = std::io::stdout();
        let mut out = out.lock();
        out.write_all(encoded.get_ref())?;
    } else {
        // This won't respect the output format specified by the user,
        // only the extension on the path they specify, but that makes
        // more sense, and is probably better than detecting and emitting
        // an error
        stylized.save(&args.output_path)?;
    }

    Ok(())
}

struct ProgressLine {
    pb: ProgressBar,
}

impl ProgressLine {
    fn new(steps: i64) -> Self {
        let pb = ProgressBar::new((steps + 1) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .progress_chars("##-"),
        );

        Self { pb }
    }
}

impl Drop for ProgressLine {
    fn drop(&mut self) {
        self.pb.finish();
    }
}

impl TransferProgress for ProgressLine {
    fn update(&mut self, update: ProgressUpdate<'_>) {
        self.pb.set_position(update.step as u64);
        self.pb.set_message(&format!(
            "style {:.4} content {:.4}",
            update.style_score, update.content_score
        ));
    }
}
