use style_transfer as st;

fn main() -> Result<(), st::Error> {
    // Create a new session with default parameters: 300 steps, content
    // measured at conv_4, style at conv_1 through conv_5
    let session = st::Session::builder()
        // The image whose layout is preserved
        .content(&"imgs/dancing.jpg")
        // The image whose texture is imitated
        .style(&"imgs/picasso.jpg")
        // The pretrained VGG19 weights, see the `vgg` module docs for
        // where to download them
        .vgg_weights("vgg19.ot")
        // Both inputs must end up the same size
        .resize_input(st::Dims::square(128))
        .build()?;

    // Optimize a copy of the content image against the style statistics
    let stylized = session.run(None)?;

    // Save the result to the disk
    stylized.save("out/01.png")
}
