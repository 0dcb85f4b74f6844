//! 画像1枚のGrad-CAMオーバーレイをPNGで保存する簡易バイナリ

use gradcam_overlay_lib::{grad_cam_with_config, runtime, AppConfig};

fn main() {
    runtime::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: gradcam <image_path> [output_path] [layer_name] [config_path]");
        std::process::exit(1);
    }

    let image_path = &args[1];
    let output_path = args.get(2).map(String::as_str).unwrap_or("gradcam.png");
    let config = match args.get(4) {
        Some(path) => AppConfig::load_or_default_from(path),
        None => AppConfig::load_or_default(),
    };
    let layer = args.get(3).cloned().unwrap_or_else(|| config.model.target_layer.clone());
    config.display();

    let image = match image::open(image_path) {
        Ok(image) => image,
        Err(e) => {
            tracing::error!("画像の読み込みエラー ({}): {}", image_path, e);
            std::process::exit(1);
        }
    };

    let Some(overlay) = grad_cam_with_config(&config, &image, &layer) else {
        std::process::exit(1);
    };

    if let Err(e) = overlay.save(output_path) {
        tracing::error!("画像の保存エラー ({}): {}", output_path, e);
        std::process::exit(1);
    }
    tracing::info!("保存しました: {}", output_path);
}
