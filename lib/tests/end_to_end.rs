//! Drives the whole public surface with a small synthetic extractor so
//! the tests do not depend on the pretrained weights file.

use style_transfer as st;
use style_transfer::tch::{kind::FLOAT_CPU, nn, Device, Tensor};

fn tiny_extractor() -> st::FeatureExtractor {
    st::tch::manual_seed(3);
    let vs = nn::VarStore::new(Device::Cpu);
    let layers = {
        let root = vs.root();
        let cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
        vec![
            st::Layer::Conv(nn::conv2d(&root / "0", 3, 4, 3, cfg)),
            st::Layer::Relu,
            st::Layer::Conv(nn::conv2d(&root / "2", 4, 8, 3, cfg)),
            st::Layer::Relu,
            st::Layer::MaxPool { kernel: 2 },
            st::Layer::Conv(nn::conv2d(&root / "5", 8, 8, 3, cfg)),
            st::Layer::Relu,
        ]
    };
    st::FeatureExtractor::from_layers(vs, layers)
}

fn noise_image(width: u32, height: u32, seed: i64) -> st::image::DynamicImage {
    st::tch::manual_seed(seed);
    let noise = Tensor::rand([(height * width * 3) as i64], FLOAT_CPU) * 255.;
    let bytes = Vec::<u8>::try_from(&noise.to_kind(st::tch::Kind::Uint8)).unwrap();
    st::image::DynamicImage::ImageRgb8(
        st::image::RgbImage::from_raw(width, height, bytes).unwrap(),
    )
}

#[test]
fn transfer_produces_valid_image() {
    let session = st::Session::builder()
        .content(noise_image(16, 16, 1))
        .style(noise_image(16, 16, 2))
        .extractor(tiny_extractor())
        .steps(60)
        .style_weight(10_000.)
        .content_layers(["conv_2"])
        .style_layers(["conv_1", "conv_2", "conv_3"])
        .build()
        .unwrap();

    let reports = std::sync::Arc::new(std::sync::Mutex::new(0usize));
    let sink = std::sync::Arc::clone(&reports);
    let progress: Box<dyn st::TransferProgress> =
        Box::new(move |update: st::ProgressUpdate<'_>| {
            assert_eq!(update.image.size(), &[1, 3, 16, 16]);
            assert!(update.style_score >= 0.);
            assert!(update.content_score >= 0.);
            *sink.lock().unwrap() += 1;
        });

    let stylized = session.run(Some(progress)).unwrap();

    let tensor = stylized.as_ref();
    assert_eq!(tensor.size(), &[1, 3, 16, 16]);
    assert!(f64::try_from(tensor.min()).unwrap() >= 0.);
    assert!(f64::try_from(tensor.max()).unwrap() <= 1.);

    // 61 passes, reported at step 50.
    assert_eq!(*reports.lock().unwrap(), 1);

    let img = stylized.to_image().unwrap();
    assert_eq!((img.width(), img.height()), (16, 16));
}

#[test]
fn resized_inputs_flow_through() {
    let session = st::Session::builder()
        .content(noise_image(20, 14, 4))
        .style(noise_image(64, 48, 5))
        .extractor(tiny_extractor())
        .resize_input(st::Dims::new(16, 16))
        .steps(0)
        .build()
        .unwrap();

    let stylized = session.run(None).unwrap();
    assert_eq!(stylized.as_ref().size(), &[1, 3, 16, 16]);
}
