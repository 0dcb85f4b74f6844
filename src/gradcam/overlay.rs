//! ヒートマップのカラー化と元画像への重ね合わせ

use image::{imageops::FilterType, DynamicImage, ImageBuffer, Luma, Rgb, RgbImage};

use crate::error::{GradCamError, Result};
use crate::gradcam::heatmap::Heatmap;
use crate::model::OverlaySettings;

/// jet カラーマップ（青 -> シアン -> 黄 -> 赤）
pub fn jet(intensity: u8) -> Rgb<u8> {
    let x = intensity as f32 / 255.0;
    let channel = |center: f32| {
        let v = (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

pub struct Visualizer {
    settings: OverlaySettings,
}

impl Visualizer {
    pub fn new(settings: OverlaySettings) -> Self {
        Self { settings }
    }

    /// ヒートマップを元画像に重ねた表示用画像を作る
    ///
    /// ヒートマップはまず `heatmap_size`（モデル入力サイズ）へ拡大し、
    /// 表示キャンバスと大きさが異なる場合はさらにキャンバスへ合わせます。
    pub fn visualize(&self, image: &DynamicImage, heatmap: &Heatmap, heatmap_size: u32) -> Result<RgbImage> {
        let canvas = self.settings.display_size;
        let mut colormap = self.raw_to_colormap(heatmap, heatmap_size)?;
        if colormap.dimensions() != (canvas, canvas) {
            colormap = image::imageops::resize(&colormap, canvas, canvas, FilterType::Triangle);
        }
        let original = self.prepare_original(image);
        self.superimpose_heatmap(&original, &colormap)
    }

    /// 拡大 -> 8bit量子化 -> jet
    pub fn raw_to_colormap(&self, heatmap: &Heatmap, size: u32) -> Result<RgbImage> {
        if size == 0 {
            return Err(GradCamError::Computation("ヒートマップの出力サイズが0です".to_string()));
        }
        let raw: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(
            heatmap.width() as u32,
            heatmap.height() as u32,
            heatmap.values().to_vec(),
        )
        .ok_or_else(|| GradCamError::Computation("ヒートマップのバッファ作成に失敗しました".to_string()))?;

        let resized = image::imageops::resize(&raw, size, size, FilterType::Triangle);

        let mut colormap = RgbImage::new(size, size);
        for (x, y, pixel) in resized.enumerate_pixels() {
            // 切り捨てで量子化
            let intensity = (pixel[0].clamp(0.0, 1.0) * 255.0) as u8;
            colormap.put_pixel(x, y, jet(intensity));
        }
        Ok(colormap)
    }

    /// 元画像を表示キャンバスの大きさのRGBへ変換（縦横比は保持しない）
    pub fn prepare_original(&self, image: &DynamicImage) -> RgbImage {
        let canvas = self.settings.display_size;
        image.resize_exact(canvas, canvas, FilterType::Triangle).to_rgb8()
    }

    /// `(1 - alpha) * original + alpha * heatmap`
    pub fn superimpose_heatmap(&self, original: &RgbImage, heatmap: &RgbImage) -> Result<RgbImage> {
        if original.dimensions() != heatmap.dimensions() {
            return Err(GradCamError::Computation(format!(
                "重ね合わせる画像のサイズが一致しません: {:?} / {:?}",
                original.dimensions(),
                heatmap.dimensions()
            )));
        }

        let alpha = self.settings.heatmap_alpha.clamp(0.0, 1.0);
        let (width, height) = original.dimensions();
        let mut superimposed = RgbImage::new(width, height);
        for ((out, base), heat) in superimposed
            .pixels_mut()
            .zip(original.pixels())
            .zip(heatmap.pixels())
        {
            for c in 0..3 {
                let value = (1.0 - alpha) * base[c] as f32 + alpha * heat[c] as f32;
                out[c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(superimposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgba, RgbaImage};

    fn visualizer() -> Visualizer {
        Visualizer::new(OverlaySettings::default())
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 128]));
        assert_eq!(jet(255), Rgb([128, 0, 0]));
        // 中央付近は緑が最大
        assert_eq!(jet(128)[1], 255);
    }

    #[test]
    fn test_colormap_has_requested_size() {
        let heatmap = Heatmap::new(4, 4, vec![0.0; 16]).unwrap();
        let colormap = visualizer().raw_to_colormap(&heatmap, 32).unwrap();
        assert_eq!(colormap.dimensions(), (32, 32));
        assert!(colormap.pixels().all(|p| *p == jet(0)));
    }

    #[test]
    fn test_prepare_original_converts_gray_and_rgba() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(128, 128, image::Luma([7])));
        let prepared = visualizer().prepare_original(&gray);
        assert_eq!(prepared.dimensions(), (512, 512));
        assert_eq!(*prepared.get_pixel(10, 10), Rgb([7, 7, 7]));

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 60, Rgba([1, 2, 3, 255])));
        let prepared = visualizer().prepare_original(&rgba);
        assert_eq!(prepared.dimensions(), (512, 512));
        assert_eq!(*prepared.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_blend_weights() {
        let original = RgbImage::from_pixel(2, 2, Rgb([100, 200, 0]));
        let heat = RgbImage::from_pixel(2, 2, Rgb([200, 0, 255]));
        let blended = visualizer().superimpose_heatmap(&original, &heat).unwrap();
        // 0.4 * 元画像 + 0.6 * ヒートマップ
        assert_eq!(*blended.get_pixel(1, 1), Rgb([160, 80, 153]));
    }

    #[test]
    fn test_blend_size_mismatch_is_error() {
        let original = RgbImage::new(2, 2);
        let heat = RgbImage::new(3, 3);
        assert!(visualizer().superimpose_heatmap(&original, &heat).is_err());
    }

    #[test]
    fn test_canvas_differs_from_heatmap_size() {
        let settings = OverlaySettings {
            display_size: 64,
            ..OverlaySettings::default()
        };
        let heatmap = Heatmap::new(2, 2, vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let image = DynamicImage::new_rgb8(10, 20);
        let overlay = Visualizer::new(settings).visualize(&image, &heatmap, 32).unwrap();
        assert_eq!(overlay.dimensions(), (64, 64));
    }
}
