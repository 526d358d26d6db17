//! 解码帧过滤器: 在 ez-ffmpeg 调度线程内把 yuv420p 帧转换为 RGB 并交给帧源
use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 通道满时的交付方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// 摄像头: 丢弃旧帧, 解码不能被拖慢
    DropWhenFull,
    /// 文件: 阻塞等待读取端, 不丢帧
    Block,
}

/// FFmpeg解码过滤器: YUV420P帧 → RGB图像 → 通道
pub struct DecodeFilter {
    tx: Sender<RgbImage>,
    delivery: Delivery,
    count: usize,
    last: Instant,
    dropped_frames: usize, // 丢弃的帧数
    total_frames: usize,   // 总帧数
}

impl DecodeFilter {
    pub fn new(tx: Sender<RgbImage>, delivery: Delivery) -> Self {
        Self {
            tx,
            delivery,
            count: 0,
            last: Instant::now(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) -> Result<Option<Frame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
        Ok(None)
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        // 基本检查：空帧或损坏帧
        if unsafe { frame.as_ptr().is_null() } || frame.is_empty() || frame.is_corrupt() {
            return self.drop_frame("空帧/损坏帧");
        }

        // SAFETY: 指针非空, 帧在本次调用期间有效
        let raw = unsafe { &*frame.as_ptr() };
        let w = raw.width as u32;
        let h = raw.height as u32;
        if w == 0 || h == 0 || w > 4096 || h > 4096 {
            return self.drop_frame(&format!("非法分辨率 {}x{}", w, h));
        }

        // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
        if raw.decode_error_flags & 0x03 != 0 {
            return self.drop_frame(&format!("解码错误标志=0x{:02x}", raw.decode_error_flags));
        }

        let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
        let y_stride = raw.linesize[0] as usize;
        let uv_stride = raw.linesize[1] as usize;
        if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
            return self.drop_frame("YUV指针为空");
        }
        if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
            return self.drop_frame(&format!("步长异常 y_stride={} uv_stride={}", y_stride, uv_stride));
        }

        let mut buffer = vec![0u8; (w * h * 3) as usize];
        // SAFETY: 平面指针与步长已校验, 管线固定输出 yuv420p
        unsafe {
            yuv420p_to_rgb(
                y_plane, u_plane, v_plane, y_stride, uv_stride, &mut buffer, w as usize, h as usize,
            );
        }
        let Some(image) = RgbImage::from_raw(w, h, buffer) else {
            return self.drop_frame("缓冲区尺寸不匹配");
        };

        match self.delivery {
            Delivery::Block => {
                if self.tx.send(image).is_err() {
                    return Err(String::from("frame receiver closed"));
                }
            }
            Delivery::DropWhenFull => match self.tx.try_send(image) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.dropped_frames += 1,
                Err(TrySendError::Disconnected(_)) => {
                    return Err(String::from("frame receiver closed"));
                }
            },
        }
        self.count += 1;

        // 每秒打印一次解码统计
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            debug!(
                "📺 解码统计: 解码{}帧 | 实际{:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                self.count,
                self.count as f64 / elapsed,
                self.total_frames,
                self.dropped_frames,
                drop_rate
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 解码线程退出");
    }
}

/// YUV420P → RGB (BT.601, 整数系数)
#[inline]
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
}
