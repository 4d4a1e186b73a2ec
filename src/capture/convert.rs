//! 原始缓冲区 → 帧
//!
//! 平台会把每行填充到对齐边界。有效宽度按 `stride / bytes_per_pixel` 计算，
//! 只保留前 `width` 列，输出紧凑的 RGBA 帧。

use anyhow::{anyhow, Result};

use super::{Frame, PixelFormat, PixelLayout, RawBuffer};

/// 按行跨度推算的有效宽度 (像素)
pub fn effective_width(stride: usize, format: PixelFormat) -> usize {
    stride / format.bytes_per_pixel()
}

/// 将平台缓冲区裁剪并转换为紧凑 RGBA 帧
pub fn frame_from_buffer(buffer: &RawBuffer) -> Result<Frame> {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let stride = buffer.stride();
    let format = buffer.format();
    let bpp = format.bytes_per_pixel();

    let padded_width = effective_width(stride, format);
    if padded_width < width {
        return Err(anyhow!(
            "行跨度 {} 不足以容纳 {} 像素 (有效宽度 {})",
            stride,
            width,
            padded_width
        ));
    }

    let data = buffer.data();
    if height > 0 && data.len() < stride * (height - 1) + width * bpp {
        return Err(anyhow!(
            "缓冲区过短: {} 字节, {}x{} stride={}",
            data.len(),
            width,
            height,
            stride
        ));
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in data.chunks(stride).take(height) {
        let row = &row[..width * bpp];
        match format {
            PixelFormat::Rgba8888 => pixels.extend_from_slice(row),
            _ => {
                for px in row.chunks_exact(bpp) {
                    pixels.extend_from_slice(&format.to_rgba(px));
                }
            }
        }
    }

    if padded_width > width {
        tracing::trace!("裁剪行填充: {} -> {} 像素", padded_width, width);
    }

    Frame::new(
        buffer.width(),
        buffer.height(),
        PixelLayout::packed(buffer.width(), PixelFormat::Rgba8888),
        pixels,
        buffer.timestamp(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::BufferPool;
    use std::sync::Arc;

    fn pool(width: u32, height: u32, format: PixelFormat) -> BufferPool {
        BufferPool::new(width, height, format, 1, Arc::new(|_buf: RawBuffer| {}))
    }

    #[test]
    fn test_effective_width() {
        assert_eq!(effective_width(448, PixelFormat::Rgba8888), 112);
        assert_eq!(effective_width(300, PixelFormat::Rgb888), 100);
    }

    #[test]
    fn test_padding_is_cropped() {
        // 3x2 RGBA，行跨度 16 字节 (1 像素填充)
        let pool = pool(3, 2, PixelFormat::Rgba8888);
        let mut buf = pool.surface().dequeue(16).unwrap();
        for row in buf.data_mut().chunks_mut(16) {
            row[..12].copy_from_slice(&[9, 8, 7, 255].repeat(3));
            row[12..16].copy_from_slice(&[0xAA; 4]);
        }

        let frame = frame_from_buffer(&buf).unwrap();
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.layout().stride, 12);
        assert_eq!(frame.data().len(), 24);
        assert!(frame.data().chunks(4).all(|px| px == [9, 8, 7, 255]));
    }

    #[test]
    fn test_bgra_is_swizzled() {
        let pool = pool(1, 1, PixelFormat::Bgra8888);
        let mut buf = pool.surface().dequeue(4).unwrap();
        buf.data_mut().copy_from_slice(&[0, 0, 255, 255]);

        let frame = frame_from_buffer(&buf).unwrap();
        assert_eq!(frame.pixel(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_stride_too_small() {
        let pool = pool(4, 1, PixelFormat::Rgba8888);
        let buf = pool.surface().dequeue(8).unwrap();
        assert!(frame_from_buffer(&buf).is_err());
    }
}
