//! 屏幕捕获模块
//!
//! 平台捕获原语的抽象、帧数据模型，以及把原始缓冲区转成帧的捕获管线

use anyhow::{anyhow, Result};
use std::time::Instant;

use crate::error::CaptureError;

pub mod convert;
pub mod pipeline;
pub mod pool;
pub mod synthetic;

pub use pipeline::{CapturePipeline, DisplayInfo, PipelineStats};
pub use pool::{RawBuffer, Surface};

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// R, G, B, A 各 1 字节
    Rgba8888,
    /// B, G, R, A 各 1 字节
    Bgra8888,
    /// R, G, B 各 1 字节，无 alpha
    Rgb888,
}

impl PixelFormat {
    /// 每像素字节数
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => 4,
            PixelFormat::Rgb888 => 3,
        }
    }

    /// 读取一个像素并转成 RGBA
    pub fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra8888 => [px[2], px[1], px[0], px[3]],
            PixelFormat::Rgb888 => [px[0], px[1], px[2], 0xFF],
        }
    }
}

/// 像素布局：行跨度 + 字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    /// 每行字节数 (可能含对齐填充)
    pub stride: usize,
    pub format: PixelFormat,
}

impl PixelLayout {
    /// 无填充的紧凑布局
    pub fn packed(width: u32, format: PixelFormat) -> Self {
        Self {
            stride: width as usize * format.bytes_per_pixel(),
            format,
        }
    }
}

/// 视频帧
///
/// 构造后不可变。存入 [`crate::frame_store::FrameStore`] 后以 `Arc<Frame>` 共享。
#[derive(Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    captured_at: Instant,
    data: Vec<u8>,
}

impl Frame {
    /// 从像素数据创建帧
    ///
    /// 尺寸必须大于 0，且缓冲区必须覆盖 `height` 行的有效像素
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
        captured_at: Instant,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("帧尺寸无效: {}x{}", width, height));
        }

        let row_bytes = width as usize * layout.format.bytes_per_pixel();
        if layout.stride < row_bytes {
            return Err(anyhow!(
                "行跨度 {} 小于行宽 {} 字节",
                layout.stride,
                row_bytes
            ));
        }

        let required = layout.stride * (height as usize - 1) + row_bytes;
        if data.len() < required {
            return Err(anyhow!(
                "像素数据不足: 需要 {} 字节, 实际 {} 字节",
                required,
                data.len()
            ));
        }

        Ok(Frame {
            width,
            height,
            layout,
            captured_at,
            data,
        })
    }

    /// 创建纯色 RGBA 帧
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self::new(
            width,
            height,
            PixelLayout::packed(width, PixelFormat::Rgba8888),
            data,
            Instant::now(),
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// 捕获时间 (单调时钟)
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 第 `y` 行的有效像素 (不含填充)
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.layout.stride;
        let len = self.width as usize * self.layout.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// 读取 (x, y) 处像素，返回 RGBA
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.layout.format.bytes_per_pixel();
        let offset = x as usize * bpp;
        self.layout.format.to_rgba(&self.row(y)[offset..offset + bpp])
    }
}

/// 物理显示器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    /// 像素密度 (dpi)
    pub density: u32,
}

/// 虚拟显示器请求参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySpec {
    pub width: u32,
    pub height: u32,
    pub density: u32,
}

/// 平台捕获句柄
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureHandle {
    id: u64,
}

impl CaptureHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// 虚拟显示器句柄
#[derive(Debug, PartialEq, Eq)]
pub struct DisplayHandle {
    id: u64,
    spec: DisplaySpec,
}

impl DisplayHandle {
    pub fn new(id: u64, spec: DisplaySpec) -> Self {
        Self { id, spec }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> DisplaySpec {
        self.spec
    }
}

/// 平台屏幕镜像原语
///
/// 缓冲区投递由平台在自己的线程上完成：从 [`Surface`] 取出空闲缓冲区，
/// 填充像素后再交回 `Surface`，后者在同一线程上调用管线回调。
pub trait CaptureBackend: Send {
    /// 物理显示器参数
    fn display_metrics(&self) -> DisplayMetrics;

    /// 用授权 token 申请捕获
    fn request_capture(&mut self, token: &str) -> Result<CaptureHandle, CaptureError>;

    /// 创建向 `surface` 投递像素的虚拟显示器
    fn create_virtual_display(
        &mut self,
        capture: &CaptureHandle,
        spec: DisplaySpec,
        surface: Surface,
    ) -> Result<DisplayHandle, CaptureError>;

    /// 释放虚拟显示器，返回后不再投递缓冲区
    fn release_display(&mut self, display: DisplayHandle) -> Result<()>;

    /// 释放捕获句柄
    fn release_capture(&mut self, capture: CaptureHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::solid(1920, 1080, [1, 2, 3, 255]).unwrap();
        assert_eq!(frame.width(), 1920);
        assert_eq!(frame.height(), 1080);
        assert_eq!(frame.data().len(), 1920 * 1080 * 4);
        assert_eq!(frame.layout().stride, 1920 * 4);
        assert_eq!(frame.pixel(1919, 1079), [1, 2, 3, 255]);
    }

    #[test]
    fn test_frame_rejects_zero_size() {
        let layout = PixelLayout::packed(0, PixelFormat::Rgba8888);
        assert!(Frame::new(0, 10, layout, Vec::new(), Instant::now()).is_err());
    }

    #[test]
    fn test_frame_rejects_short_buffer() {
        let layout = PixelLayout::packed(4, PixelFormat::Rgba8888);
        let data = vec![0u8; 4 * 4 * 3];
        assert!(Frame::new(4, 4, layout, data, Instant::now()).is_err());
    }

    #[test]
    fn test_frame_with_padded_stride() {
        // 2x2 BGRA，每行填充到 16 字节
        let layout = PixelLayout {
            stride: 16,
            format: PixelFormat::Bgra8888,
        };
        let mut data = vec![0u8; 16 + 8];
        data[16..20].copy_from_slice(&[30, 20, 10, 255]);
        let frame = Frame::new(2, 2, layout, data, Instant::now()).unwrap();
        assert_eq!(frame.row(1).len(), 8);
        assert_eq!(frame.pixel(0, 1), [10, 20, 30, 255]);
    }

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgba8888.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Bgra8888.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb888.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Rgb888.to_rgba(&[1, 2, 3]), [1, 2, 3, 255]);
    }
}
