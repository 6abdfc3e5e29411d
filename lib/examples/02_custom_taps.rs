use style_transfer as st;

fn main() -> Result<(), st::Error> {
    let session = st::Session::builder()
        .content(&"imgs/dancing.jpg")
        .style(&"imgs/picasso.jpg")
        .vgg_weights("vgg19.ot")
        .resize_input(st::Dims::new(192, 128))
        // A longer run with a gentler style emphasis
        .steps(500)
        .style_weight(100_000.)
        // Shallow taps only: texture without the larger style structures
        .style_layers(["conv_1", "conv_2", "conv_3"])
        .content_layers(["conv_4"])
        .build()?;

    // Periodically print the unweighted scores
    let progress: Box<dyn st::TransferProgress> = Box::new(|update: st::ProgressUpdate<'_>| {
        println!(
            "step {:>4}/{}  style {:.6}  content {:.6}",
            update.step, update.total_steps, update.style_score, update.content_score
        );
    });

    let stylized = session.run(Some(progress))?;
    stylized.save("out/02.png")
}
