//! 入力画像の前処理

use burn::tensor::{backend::Backend, Tensor};
use image::{imageops::FilterType, DynamicImage};

use crate::error::{GradCamError, Result};

/// 画像をモデル入力用に正規化
///
/// グレースケール化し、`input_size` x `input_size` にバイリニア縮小・拡大して
/// 0～1に正規化します（縦横比は保持しない）。
///
/// # 戻り値
/// - 行優先で平坦化した画素値 (H, W)
pub fn normalize_image(image: &DynamicImage, input_size: usize) -> Result<Vec<f32>> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(GradCamError::Preprocess(format!(
            "画像サイズが不正です: {}x{}",
            width, height
        )));
    }
    if input_size == 0 {
        return Err(GradCamError::Preprocess("モデル入力サイズが0です".to_string()));
    }

    let size = input_size as u32;
    let gray = image.to_luma8();
    let resized = image::imageops::resize(&gray, size, size, FilterType::Triangle);

    Ok(resized.pixels().map(|p| p[0] as f32 / 255.0).collect())
}

/// 画像をテンソル [1, 1, size, size] に変換
pub fn preprocess<B: Backend>(
    image: &DynamicImage,
    input_size: usize,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let data = normalize_image(image, input_size)?;
    Ok(Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([1, 1, input_size, input_size]))
}
