//! 捕获管线
//!
//! 连接平台屏幕镜像原语与 [`FrameStore`]：申请捕获、创建虚拟显示器，
//! 把每个到达的原始缓冲区转换成帧写入存储，然后立即归还缓冲区。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::convert;
use super::pool::{BufferCallback, BufferPool};
use super::{
    CaptureBackend, CaptureHandle, DisplayHandle, DisplayMetrics, DisplaySpec, PixelFormat,
    RawBuffer,
};
use crate::error::CaptureError;
use crate::frame_store::FrameStore;

/// 默认缓冲区池深度
pub const DEFAULT_BUFFER_DEPTH: usize = 2;

/// 进程内是否已有活动的捕获会话
static CAPTURE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// 进程级捕获槽位，drop 时释放
struct CaptureSlot;

impl CaptureSlot {
    fn claim() -> Option<Self> {
        CAPTURE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CaptureSlot)
    }
}

impl Drop for CaptureSlot {
    fn drop(&mut self) {
        CAPTURE_ACTIVE.store(false, Ordering::Release);
    }
}

/// 本进程是否已有活动的捕获会话
pub fn capture_active_in_process() -> bool {
    CAPTURE_ACTIVE.load(Ordering::Acquire)
}

/// 管线计数器
#[derive(Debug, Default)]
pub struct PipelineStats {
    delivered: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    /// 平台投递的缓冲区数
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// 成功写入存储的帧数
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// 转换失败的缓冲区数
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// 已建立的虚拟显示器信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub density: u32,
}

/// 一次活动的捕获会话
struct CaptureSession {
    capture: CaptureHandle,
    display: DisplayHandle,
    pool: BufferPool,
    // 最后释放
    _slot: CaptureSlot,
}

/// 捕获管线
pub struct CapturePipeline {
    backend: Box<dyn CaptureBackend>,
    store: FrameStore,
    buffer_depth: usize,
    format: PixelFormat,
    stats: Arc<PipelineStats>,
    session: Option<CaptureSession>,
}

impl CapturePipeline {
    /// 创建捕获管线
    ///
    /// # 参数
    /// * `backend` - 平台捕获原语
    /// * `store` - 帧写入的目标存储
    /// * `buffer_depth` - 原始缓冲区池深度
    pub fn new(backend: Box<dyn CaptureBackend>, store: FrameStore, buffer_depth: usize) -> Self {
        Self {
            backend,
            store,
            buffer_depth: buffer_depth.max(1),
            format: PixelFormat::Rgba8888,
            stats: Arc::new(PipelineStats::default()),
            session: None,
        }
    }

    /// 设置向平台请求的像素格式
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// 物理显示器参数
    pub fn display_metrics(&self) -> DisplayMetrics {
        self.backend.display_metrics()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// 开始捕获
    ///
    /// token 无效时返回 [`CaptureError::PermissionDenied`]；
    /// 虚拟显示器创建失败时释放捕获句柄并返回 [`CaptureError::DisplaySetupFailed`]。
    /// 同一进程内最多只有一个活动的捕获会话
    pub fn start(
        &mut self,
        token: &str,
        width: u32,
        height: u32,
        density: u32,
    ) -> Result<DisplayInfo, CaptureError> {
        if self.session.is_some() {
            return Err(CaptureError::DisplaySetupFailed(
                "捕获会话已在运行".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(CaptureError::DisplaySetupFailed(format!(
                "无效的显示尺寸: {}x{}",
                width, height
            )));
        }

        let Some(slot) = CaptureSlot::claim() else {
            return Err(CaptureError::DisplaySetupFailed(
                "本进程已有活动的捕获会话".to_string(),
            ));
        };

        let capture = self.backend.request_capture(token).map_err(|e| {
            error!("申请屏幕捕获失败: {}", e);
            e
        })?;
        debug!("捕获句柄已获取: {}", capture.id());

        let pool = BufferPool::new(
            width,
            height,
            self.format,
            self.buffer_depth,
            buffer_callback(self.store.clone(), self.stats.clone()),
        );

        let spec = DisplaySpec {
            width,
            height,
            density,
        };
        let display = match self
            .backend
            .create_virtual_display(&capture, spec, pool.surface())
        {
            Ok(display) => display,
            Err(e) => {
                error!("创建虚拟显示器失败: {}", e);
                pool.close();
                if let Err(release_err) = self.backend.release_capture(capture) {
                    warn!("释放捕获句柄失败: {}", release_err);
                }
                return Err(e);
            }
        };

        let info = DisplayInfo {
            id: display.id(),
            width,
            height,
            density,
        };
        info!(
            "屏幕捕获已启动: {}x{} @ {}dpi, 缓冲区深度 {}",
            width, height, density, self.buffer_depth
        );

        self.session = Some(CaptureSession {
            capture,
            display,
            pool,
            _slot: slot,
        });
        Ok(info)
    }

    /// 停止捕获
    ///
    /// 依次释放虚拟显示器、缓冲区池、捕获句柄。未启动时调用无副作用
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let spec = session.display.spec();
        debug!("释放虚拟显示器: {}x{}", spec.width, spec.height);
        if let Err(e) = self.backend.release_display(session.display) {
            warn!("释放虚拟显示器失败: {}", e);
        }

        session.pool.close();

        if let Err(e) = self.backend.release_capture(session.capture) {
            warn!("释放捕获句柄失败: {}", e);
        }

        info!(
            "屏幕捕获已停止: 投递 {} 帧, 发布 {} 帧, 失败 {} 帧",
            self.stats.delivered(),
            self.stats.published(),
            self.stats.failed()
        );
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn buffer_callback(store: FrameStore, stats: Arc<PipelineStats>) -> BufferCallback {
    Arc::new(move |buffer: RawBuffer| {
        stats.delivered.fetch_add(1, Ordering::Relaxed);

        match convert::frame_from_buffer(&buffer) {
            Ok(frame) => {
                trace!("新帧: {}x{}", frame.width(), frame.height());
                store.put(frame);
                stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("帧转换失败: {}", e);
            }
        }

        // 归还缓冲区
        drop(buffer);
    })
}

/// 启动捕获的测试共用进程级槽位，需串行执行
#[cfg(test)]
pub(crate) fn serial_capture_guard() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
    LOCK.lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Surface;
    use anyhow::Result;
    use parking_lot::Mutex;

    /// 记录调用顺序的平台替身，缓冲区由测试手动投递
    #[derive(Clone, Default)]
    struct ManualBackend {
        calls: Arc<Mutex<Vec<String>>>,
        surface: Arc<Mutex<Option<Surface>>>,
        fail_display: bool,
        fail_release: bool,
    }

    impl ManualBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn deliver(&self, stride: usize, fill: &[u8]) -> bool {
            let surface = self.surface.lock().clone();
            let Some(surface) = surface else {
                return false;
            };
            let Some(mut buf) = surface.dequeue(stride) else {
                return false;
            };
            for (i, byte) in buf.data_mut().iter_mut().enumerate() {
                *byte = fill[i % fill.len()];
            }
            surface.queue(buf);
            true
        }
    }

    impl CaptureBackend for ManualBackend {
        fn display_metrics(&self) -> DisplayMetrics {
            DisplayMetrics {
                width: 8,
                height: 4,
                density: 160,
            }
        }

        fn request_capture(&mut self, token: &str) -> Result<CaptureHandle, CaptureError> {
            self.calls.lock().push("request_capture".into());
            if token == "valid" {
                Ok(CaptureHandle::new(1))
            } else {
                Err(CaptureError::PermissionDenied)
            }
        }

        fn create_virtual_display(
            &mut self,
            _capture: &CaptureHandle,
            spec: DisplaySpec,
            surface: Surface,
        ) -> Result<DisplayHandle, CaptureError> {
            self.calls.lock().push("create_virtual_display".into());
            if self.fail_display {
                return Err(CaptureError::DisplaySetupFailed("no display".into()));
            }
            *self.surface.lock() = Some(surface);
            Ok(DisplayHandle::new(7, spec))
        }

        fn release_display(&mut self, _display: DisplayHandle) -> Result<()> {
            self.calls.lock().push("release_display".into());
            self.surface.lock().take();
            if self.fail_release {
                anyhow::bail!("display busy");
            }
            Ok(())
        }

        fn release_capture(&mut self, _capture: CaptureHandle) -> Result<()> {
            self.calls.lock().push("release_capture".into());
            Ok(())
        }
    }

    #[test]
    fn test_buffers_are_published_and_cropped() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend::default();
        let store = FrameStore::new();
        let mut pipeline = CapturePipeline::new(Box::new(backend.clone()), store.clone(), 2);

        let info = pipeline.start("valid", 8, 4, 160).unwrap();
        assert_eq!((info.id, info.width, info.height), (7, 8, 4));

        // 行跨度 48 字节 = 12 像素，只保留前 8 列
        assert!(backend.deliver(48, &[255, 0, 0, 255]));
        let frame = store.get().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
        assert_eq!(frame.data().len(), 8 * 4 * 4);
        assert_eq!(frame.pixel(7, 3), [255, 0, 0, 255]);

        assert!(backend.deliver(32, &[0, 0, 255, 255]));
        assert_eq!(store.get().unwrap().pixel(0, 0), [0, 0, 255, 255]);

        let stats = pipeline.stats();
        assert_eq!(stats.delivered(), 2);
        assert_eq!(stats.published(), 2);
    }

    #[test]
    fn test_buffers_are_always_released() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend::default();
        let mut pipeline = CapturePipeline::new(Box::new(backend.clone()), FrameStore::new(), 2);
        pipeline.start("valid", 8, 4, 160).unwrap();

        // 深度为 2，只有每次都归还才能持续投递
        for _ in 0..10 {
            assert!(backend.deliver(32, &[1, 2, 3, 4]));
        }
        // 行跨度过小导致转换失败，缓冲区仍需归还
        for _ in 0..5 {
            assert!(backend.deliver(16, &[1, 2, 3, 4]));
        }
        assert_eq!(pipeline.stats().failed(), 5);
        assert!(backend.deliver(32, &[1, 2, 3, 4]));
    }

    #[test]
    fn test_permission_denied() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend::default();
        let mut pipeline = CapturePipeline::new(Box::new(backend.clone()), FrameStore::new(), 2);

        let err = pipeline.start("expired", 8, 4, 160).unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied);
        assert!(!pipeline.is_running());
        assert_eq!(backend.calls(), vec!["request_capture"]);
    }

    #[test]
    fn test_display_failure_releases_capture() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend {
            fail_display: true,
            ..Default::default()
        };
        let mut pipeline = CapturePipeline::new(Box::new(backend.clone()), FrameStore::new(), 2);

        let err = pipeline.start("valid", 8, 4, 160).unwrap_err();
        assert!(matches!(err, CaptureError::DisplaySetupFailed(_)));
        assert!(!pipeline.is_running());
        assert_eq!(
            backend.calls(),
            vec!["request_capture", "create_virtual_display", "release_capture"]
        );
    }

    #[test]
    fn test_stop_order_and_idempotence() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend {
            fail_release: true,
            ..Default::default()
        };
        let mut pipeline = CapturePipeline::new(Box::new(backend.clone()), FrameStore::new(), 2);

        pipeline.stop();
        assert!(backend.calls().is_empty());

        pipeline.start("valid", 8, 4, 160).unwrap();
        pipeline.stop();
        pipeline.stop();

        // 释放显示器失败不阻塞后续释放
        assert_eq!(
            backend.calls(),
            vec![
                "request_capture",
                "create_virtual_display",
                "release_display",
                "release_capture"
            ]
        );
        assert!(!backend.deliver(32, &[0, 0, 0, 0]));
    }

    #[test]
    fn test_second_start_is_rejected() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend::default();
        let mut pipeline = CapturePipeline::new(Box::new(backend), FrameStore::new(), 2);
        pipeline.start("valid", 8, 4, 160).unwrap();
        assert!(pipeline.start("valid", 8, 4, 160).is_err());
        assert!(pipeline.is_running());
    }

    #[test]
    fn test_drop_releases_session() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend::default();
        {
            let mut pipeline =
                CapturePipeline::new(Box::new(backend.clone()), FrameStore::new(), 2);
            pipeline.start("valid", 8, 4, 160).unwrap();
        }
        assert_eq!(backend.calls().last().map(String::as_str), Some("release_capture"));
    }

    #[test]
    fn test_bgra_buffers_are_converted() {
        let _serial = serial_capture_guard();
        let backend = ManualBackend::default();
        let store = FrameStore::new();
        let mut pipeline = CapturePipeline::new(Box::new(backend.clone()), store.clone(), 2)
            .with_pixel_format(PixelFormat::Bgra8888);
        pipeline.start("valid", 8, 4, 160).unwrap();

        assert!(backend.deliver(32, &[0, 0, 255, 255]));
        assert_eq!(store.get().unwrap().pixel(3, 2), [255, 0, 0, 255]);
    }

    #[test]
    fn test_one_capture_session_per_process() {
        let _serial = serial_capture_guard();
        let first_backend = ManualBackend::default();
        let second_backend = ManualBackend::default();
        let mut first = CapturePipeline::new(Box::new(first_backend), FrameStore::new(), 2);
        let mut second =
            CapturePipeline::new(Box::new(second_backend.clone()), FrameStore::new(), 2);

        first.start("valid", 8, 4, 160).unwrap();
        assert!(capture_active_in_process());

        let err = second.start("valid", 8, 4, 160).unwrap_err();
        assert!(matches!(err, CaptureError::DisplaySetupFailed(_)));
        assert!(!second.is_running());
        // 槽位被占用时不会触达平台
        assert!(second_backend.calls().is_empty());

        first.stop();
        assert!(!capture_active_in_process());
        second.start("valid", 8, 4, 160).unwrap();
        second.stop();
    }

    #[test]
    fn test_failed_start_releases_process_slot() {
        let _serial = serial_capture_guard();
        let mut pipeline =
            CapturePipeline::new(Box::new(ManualBackend::default()), FrameStore::new(), 2);

        assert!(pipeline.start("expired", 8, 4, 160).is_err());
        assert!(!capture_active_in_process());
    }
}
