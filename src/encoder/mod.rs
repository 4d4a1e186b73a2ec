//! 帧编码模块
//!
//! 每次 `/frame` 请求时把当前帧编码为 JPEG，再以 base64 文本发送

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ColorType;

use crate::capture::Frame;
use crate::error::EncodeError;

/// 默认 JPEG 质量
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// 帧编码器 trait
pub trait Encoder: Send + Sync {
    /// 编码一帧
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError>;

    /// 编码并转为 base64 (无换行)
    fn encode_base64(&self, frame: &Frame) -> Result<String, EncodeError> {
        let bytes = self.encode(frame)?;
        Ok(BASE64_STANDARD.encode(bytes))
    }
}

/// JPEG 编码器
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// 创建 JPEG 编码器
    ///
    /// # 参数
    /// * `quality` - 1-100，超出范围会被截断
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl Encoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        // JPEG 没有 alpha 通道，先转成紧凑 RGB
        let format = frame.layout().format;
        let bpp = format.bytes_per_pixel();
        let mut rgb = Vec::with_capacity(frame.width() as usize * frame.height() as usize * 3);
        for y in 0..frame.height() {
            for px in frame.row(y).chunks_exact(bpp) {
                let [r, g, b, _] = format.to_rgba(px);
                rgb.extend_from_slice(&[r, g, b]);
            }
        }

        let mut out = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(&rgb, frame.width(), frame.height(), ColorType::Rgb8)
            .map_err(|e| EncodeError::TransientFailure(e.to_string()))?;

        tracing::trace!(
            "JPEG 编码: {}x{} q={} -> {} bytes",
            frame.width(),
            frame.height(),
            self.quality,
            out.len()
        );

        Ok(out)
    }
}
