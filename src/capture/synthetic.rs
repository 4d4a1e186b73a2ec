//! 合成捕获平台
//!
//! 进程内实现的屏幕镜像原语：在专用线程上按目标帧率生成纯色或渐变画面，
//! 行跨度按对齐边界填充，和真实显示硬件一样受缓冲区池深度约束。

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{
    CaptureBackend, CaptureHandle, DisplayHandle, DisplayMetrics, DisplaySpec, PixelFormat,
    RawBuffer, Surface,
};
use crate::error::CaptureError;
use crate::security::GrantAuthority;

/// 默认行对齐 (字节)
pub const DEFAULT_STRIDE_ALIGNMENT: usize = 64;

/// 虚拟显示器最大边长
const MAX_DISPLAY_DIMENSION: u32 = 8192;

/// 画面内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// 纯色 (RGB)
    Solid([u8; 3]),
    /// 随时间变化的渐变
    Gradient,
}

impl Pattern {
    fn color_at(self, x: u32, y: u32, width: u32, height: u32, frame_index: u64) -> [u8; 3] {
        match self {
            Pattern::Solid(rgb) => rgb,
            Pattern::Gradient => [
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                (frame_index.wrapping_mul(4) % 256) as u8,
            ],
        }
    }
}

/// 生产计数
#[derive(Debug, Default)]
pub struct SyntheticStats {
    produced: AtomicU64,
    dropped: AtomicU64,
}

impl SyntheticStats {
    /// 已投递的帧数
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// 因缓冲区池耗尽而丢弃的帧数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct RunningDisplay {
    id: u64,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// 合成捕获平台
pub struct SyntheticBackend {
    metrics: DisplayMetrics,
    authority: GrantAuthority,
    fps: u32,
    pattern: Pattern,
    stride_alignment: usize,
    next_id: u64,
    captures: HashSet<u64>,
    display: Option<RunningDisplay>,
    stats: Arc<SyntheticStats>,
}

impl SyntheticBackend {
    /// 创建合成平台
    ///
    /// # 参数
    /// * `metrics` - 模拟的物理显示器参数
    /// * `authority` - 用于校验捕获授权 token
    pub fn new(metrics: DisplayMetrics, authority: GrantAuthority) -> Self {
        Self {
            metrics,
            authority,
            fps: 30,
            pattern: Pattern::Gradient,
            stride_alignment: DEFAULT_STRIDE_ALIGNMENT,
            next_id: 1,
            captures: HashSet::new(),
            display: None,
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// 设置行对齐字节数 (1 表示不填充)
    pub fn with_stride_alignment(mut self, alignment: usize) -> Self {
        self.stride_alignment = alignment.max(1);
        self
    }

    pub fn stats(&self) -> Arc<SyntheticStats> {
        self.stats.clone()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl CaptureBackend for SyntheticBackend {
    fn display_metrics(&self) -> DisplayMetrics {
        self.metrics
    }

    fn request_capture(&mut self, token: &str) -> Result<CaptureHandle, CaptureError> {
        if !self.authority.verify(token) {
            tracing::warn!("捕获授权无效或已过期");
            return Err(CaptureError::PermissionDenied);
        }

        let id = self.allocate_id();
        self.captures.insert(id);
        tracing::debug!("合成平台: 签发捕获句柄 {}", id);
        Ok(CaptureHandle::new(id))
    }

    fn create_virtual_display(
        &mut self,
        capture: &CaptureHandle,
        spec: DisplaySpec,
        surface: Surface,
    ) -> Result<DisplayHandle, CaptureError> {
        if !self.captures.contains(&capture.id()) {
            return Err(CaptureError::DisplaySetupFailed(format!(
                "捕获句柄 {} 无效",
                capture.id()
            )));
        }
        if self.display.is_some() {
            return Err(CaptureError::DisplaySetupFailed(
                "虚拟显示器已存在".to_string(),
            ));
        }
        if spec.width == 0
            || spec.height == 0
            || spec.width > MAX_DISPLAY_DIMENSION
            || spec.height > MAX_DISPLAY_DIMENSION
        {
            return Err(CaptureError::DisplaySetupFailed(format!(
                "不支持的显示尺寸: {}x{}",
                spec.width, spec.height
            )));
        }

        let id = self.allocate_id();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = Producer {
            surface,
            pattern: self.pattern,
            interval: Duration::from_secs_f64(1.0 / self.fps as f64),
            stride_alignment: self.stride_alignment,
            stop: stop.clone(),
            stats: self.stats.clone(),
        };

        let thread = thread::Builder::new()
            .name(format!("synthetic-display-{}", id))
            .spawn(move || producer.run())
            .map_err(|e| CaptureError::DisplaySetupFailed(e.to_string()))?;

        tracing::info!(
            "合成虚拟显示器已创建: id={}, {}x{} @ {}dpi, {}fps",
            id,
            spec.width,
            spec.height,
            spec.density,
            self.fps
        );

        self.display = Some(RunningDisplay { id, stop, thread });
        Ok(DisplayHandle::new(id, spec))
    }

    fn release_display(&mut self, display: DisplayHandle) -> Result<()> {
        let running = match self.display.take() {
            Some(running) if running.id == display.id() => running,
            other => {
                self.display = other;
                return Err(anyhow!("未知的虚拟显示器: {}", display.id()));
            }
        };

        running.stop.store(true, Ordering::Release);
        running.thread.thread().unpark();
        running
            .thread
            .join()
            .map_err(|_| anyhow!("虚拟显示器 {} 的生产线程异常退出", running.id))?;

        tracing::debug!("合成虚拟显示器已释放: {}", running.id);
        Ok(())
    }

    fn release_capture(&mut self, capture: CaptureHandle) -> Result<()> {
        if !self.captures.remove(&capture.id()) {
            return Err(anyhow!("未知的捕获句柄: {}", capture.id()));
        }
        tracing::debug!("合成平台: 捕获句柄 {} 已释放", capture.id());
        Ok(())
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        if let Some(running) = self.display.take() {
            running.stop.store(true, Ordering::Release);
            running.thread.thread().unpark();
            let _ = running.thread.join();
        }
    }
}

/// 生产线程状态
struct Producer {
    surface: Surface,
    pattern: Pattern,
    interval: Duration,
    stride_alignment: usize,
    stop: Arc<AtomicBool>,
    stats: Arc<SyntheticStats>,
}

impl Producer {
    fn run(self) {
        let bpp = self.surface.format().bytes_per_pixel();
        let row_bytes = self.surface.width() as usize * bpp;
        let stride = row_bytes.div_ceil(self.stride_alignment) * self.stride_alignment;
        let mut frame_index = 0u64;
        tracing::debug!(
            "合成帧生产线程启动: 行跨度 {} 字节, 缓冲区 {} 个",
            stride,
            self.surface.depth()
        );

        while !self.stop.load(Ordering::Acquire) {
            match self.surface.dequeue(stride) {
                Some(mut buffer) => {
                    self.paint(&mut buffer, frame_index);
                    self.surface.queue(buffer);
                    self.stats.produced.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("缓冲区池已耗尽，丢弃第 {} 帧", frame_index);
                }
            }
            frame_index += 1;
            thread::park_timeout(self.interval);
        }
    }

    fn paint(&self, buffer: &mut RawBuffer, frame_index: u64) {
        let width = buffer.width();
        let height = buffer.height();
        let stride = buffer.stride();
        let format = buffer.format();
        let bpp = format.bytes_per_pixel();

        for (y, row) in buffer.data_mut().chunks_mut(stride).enumerate() {
            let (pixels, padding) = row.split_at_mut(width as usize * bpp);
            for (x, px) in pixels.chunks_exact_mut(bpp).enumerate() {
                let [r, g, b] =
                    self.pattern
                        .color_at(x as u32, y as u32, width, height, frame_index);
                match format {
                    PixelFormat::Rgba8888 => px.copy_from_slice(&[r, g, b, 0xFF]),
                    PixelFormat::Bgra8888 => px.copy_from_slice(&[b, g, r, 0xFF]),
                    PixelFormat::Rgb888 => px.copy_from_slice(&[r, g, b]),
                }
            }
            padding.fill(0);
        }
    }
}
