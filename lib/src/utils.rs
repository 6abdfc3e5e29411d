use crate::{Dims, Error};
use std::path::Path;
use tch::{Device, Kind, Tensor};

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the session
    Image(image::DynamicImage),
}

impl<'a> ImageSource<'a> {
    pub fn from_path(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

/// Decodes an image, optionally resizes it, and converts it to a
/// `[1, 3, H, W]` float tensor with values in `[0, 1]`.
pub(crate) fn load_image(
    src: ImageSource<'_>,
    resize: Option<Dims>,
    device: Device,
) -> Result<Tensor, Error> {
    let img = load_dynamic_image(src)?;

    let img = match resize {
        None => img.to_rgb8(),
        Some(ref size) => {
            use image::GenericImageView;

            if img.width() != size.width || img.height() != size.height {
                image::imageops::resize(
                    &img.to_rgb8(),
                    size.width,
                    size.height,
                    image::imageops::FilterType::CatmullRom,
                )
            } else {
                img.to_rgb8()
            }
        }
    };

    Ok(image_to_tensor(&img, device))
}

/// `h * w * 3` bytes => `[1, 3, h, w]` float in `[0, 1]`
pub(crate) fn image_to_tensor(img: &image::RgbImage, device: Device) -> Tensor {
    let (width, height) = img.dimensions();
    let tensor = Tensor::from_slice(img.as_raw())
        .view([i64::from(height), i64::from(width), 3])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.;
    tensor.unsqueeze(0).to_device(device)
}

/// `[1, 3, h, w]` float in `[0, 1]` => `h * w * 3` bytes
pub(crate) fn tensor_to_image(tensor: &Tensor) -> Result<image::RgbImage, Error> {
    let (_, _, height, width) = tensor.size4()?;
    let hwc = (tensor * 255.)
        .clamp(0., 255.)
        .to_kind(Kind::Uint8)
        .squeeze_dim(0)
        .permute([1, 2, 0])
        .contiguous()
        .to_device(Device::Cpu);

    let mut buffer = vec![0u8; (height * width * 3) as usize];
    let len = buffer.len();
    hwc.copy_data(&mut buffer, len);

    image::RgbImage::from_raw(width as u32, height as u32, buffer).ok_or_else(|| {
        Error::Tch(tch::TchError::Convert(
            "tensor does not describe an rgb image".to_owned(),
        ))
    })
}
