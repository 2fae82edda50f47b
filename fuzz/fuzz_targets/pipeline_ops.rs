#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use image::RgbaImage;
use imagepix::engine::crop::crop_to_canvas;
use imagepix::engine::{decode, resize, CropRegion, DisplaySize, RasterImage, ResizeRequest};
use imagepix::ResizeMode;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct OperationSeed {
    kind: u8,
    a: i32,
    b: i32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

fn build_image(data: &[u8]) -> RasterImage {
    if let Ok(img) = decode(data) {
        if img.width() <= 512 && img.height() <= 512 {
            return img;
        }
    }

    let width = data.first().copied().unwrap_or(0) as u32 % 64 + 1;
    let height = data.get(1).copied().unwrap_or(0) as u32 % 64 + 1;
    let rgba = RgbaImage::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize * 4;
        let byte = |k: usize| data.get((i + k) % data.len()).copied().unwrap_or(0);
        image::Rgba([byte(0), byte(1), byte(2), byte(3)])
    });
    RasterImage::from_rgba(rgba)
}

fn mode(kind: u8) -> ResizeMode {
    match kind % 4 {
        0 => ResizeMode::Stretch,
        1 => ResizeMode::Fit,
        2 => ResizeMode::Fill,
        _ => ResizeMode::Pad,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut unstructured = Unstructured::new(data);
    let seeds: Vec<OperationSeed> = match Vec::arbitrary(&mut unstructured) {
        Ok(v) => v,
        Err(_) => return,
    };
    let img = build_image(data);

    // Errors are expected for out-of-range input; only panics matter.
    for seed in seeds.into_iter().take(8) {
        if seed.kind & 0x80 == 0 {
            let request = ResizeRequest::new(
                seed.a.clamp(-1, 1024) as u32,
                seed.b.clamp(-1, 1024) as u32,
                mode(seed.kind),
            );
            let _ = resize(&img, &request);
        } else {
            let region = CropRegion::new(seed.c as f64, seed.d as f64, seed.e as f64, seed.f as f64);
            let display = DisplaySize::new(img.width() as f64 * 0.5, img.height() as f64 * 0.5);
            let _ = crop_to_canvas(&img, &region, &display, None);
        }
    }
});
