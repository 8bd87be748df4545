use log::info;

#[derive(rust_embed::RustEmbed)]
#[folder = "assets/"]
struct Assets;

const BILLBOARD_ASSET: &str = "billboard.png";

fn decode_rgba(bytes: &[u8]) -> Option<image::RgbaImage> {
    match image::load_from_memory(bytes) {
        Ok(decoded) => Some(decoded.to_rgba8()),
        Err(e) => {
            log::error!("failed to decode billboard image: {}", e);
            None
        }
    }
}

fn mip_level_count(width: u32, height: u32) -> u32 {
    let mut levels = 1;
    let (mut w, mut h) = (width, height);
    while w > 1 || h > 1 {
        levels += 1;
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    levels
}

/// Decodes the embedded billboard sprite into a mipmapped RGBA texture.
/// A missing or undecodable asset degrades to a 1x1 opaque white
/// texture so the draw stage always has something to sample.
pub fn load_billboard_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
) -> (wgpu::TextureView, wgpu::Sampler) {
    let image = Assets::get(BILLBOARD_ASSET)
        .and_then(|file| decode_rgba(&file.data))
        .unwrap_or_else(|| {
            log::warn!("billboard asset unavailable, using 1x1 white fallback");
            image::RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255]))
        });

    let (width, height) = image.dimensions();
    let levels = mip_level_count(width, height);
    info!(
        "billboard texture: {}x{} with {} mip levels",
        width, height, levels
    );

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Billboard texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    // The mip chain is built on the host; each level is half the size
    // of the one before it, down to 1x1.
    let mut level_image = image;
    for level in 0..levels {
        if level > 0 {
            let (w, h) = level_image.dimensions();
            level_image = image::imageops::resize(
                &level_image,
                (w / 2).max(1),
                (h / 2).max(1),
                image::imageops::FilterType::Triangle,
            );
        }
        let (w, h) = level_image.dimensions();
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            level_image.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
    }

    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Billboard sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });

    (
        texture.create_view(&wgpu::TextureViewDescriptor::default()),
        sampler,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_reaches_one_by_one() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(64, 64), 7);
        assert_eq!(mip_level_count(640, 480), 10);
        assert_eq!(mip_level_count(1, 256), 9);
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(decode_rgba(b"definitely not a png").is_none());
    }

    #[test]
    fn round_trips_a_png() {
        let source = image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(source)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_rgba(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (2, 3));
        assert_eq!(decoded.get_pixel(1, 2), &image::Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn billboard_asset_is_embedded_and_decodes() {
        let file = Assets::get(BILLBOARD_ASSET).expect("billboard.png should be embedded");
        let image = decode_rgba(&file.data).expect("billboard.png should decode");
        assert!(image.width() > 0 && image.height() > 0);
    }
}
