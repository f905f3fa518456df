//! 渲染器抽象：特效子系统只需要分配离屏缓冲区、提交工作并拿到完成信号。
//!
//! GPU 后端在这里接入；仓库自带的 [`SoftwareRenderer`] 在 CPU 上完成所有工作，
//! 并支持注入分配失败与延迟完成，以便测试降级路径。

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use smithay::utils::{Physical, Size};

use super::buffer::PixelBuffer;

/// Renderer seam used by the background effect code.
pub trait EffectRenderer {
    /// Allocates a transparent offscreen buffer.
    fn create_buffer(&mut self, size: Size<i32, Physical>) -> Result<PixelBuffer, RenderError>;

    /// Submits the work recorded since the last submission.
    ///
    /// Never blocks; the returned sync point signals once the work has completed.
    fn submit(&mut self) -> SyncPoint;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Could not allocate a buffer of this size.
    OutOfMemory(Size<i32, Physical>),
    /// Submitted work did not complete in time for this frame.
    NotReady,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::OutOfMemory(size) => {
                write!(f, "out of memory allocating a {} × {} buffer", size.w, size.h)
            }
            RenderError::NotReady => f.write_str("submitted work has not completed"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Completion signal of submitted work.
#[derive(Debug, Clone)]
pub struct SyncPoint(Rc<Cell<bool>>);

impl SyncPoint {
    /// Sync point that is already reached.
    pub fn signaled() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn pending() -> Self {
        Self(Rc::new(Cell::new(false)))
    }

    pub fn is_reached(&self) -> bool {
        self.0.get()
    }

    pub fn signal(&self) {
        self.0.set(true);
    }
}

/// CPU renderer.
#[derive(Debug, Default)]
pub struct SoftwareRenderer {
    /// Largest buffer, in pixels, that can be allocated.
    max_buffer_pixels: Option<usize>,
    /// Number of upcoming allocations that will fail.
    fail_allocations: usize,
    /// Allocations that still succeed before `fail_allocations` kicks in.
    fail_after: usize,
    /// Whether submissions stay pending until [`Self::complete_pending`].
    defer_completion: bool,
    pending: Vec<SyncPoint>,
    allocations: usize,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_buffer_pixels(max: usize) -> Self {
        Self {
            max_buffer_pixels: Some(max),
            ..Self::default()
        }
    }

    /// Makes the next `count` allocations fail.
    pub fn fail_next_allocations(&mut self, count: usize) {
        self.fail_allocations_after(0, count);
    }

    /// Lets `skip` allocations succeed, then makes the following `count` fail.
    pub fn fail_allocations_after(&mut self, skip: usize, count: usize) {
        self.fail_after = skip;
        self.fail_allocations = count;
    }

    pub fn set_defer_completion(&mut self, defer: bool) {
        self.defer_completion = defer;
    }

    /// Signals every pending submission.
    pub fn complete_pending(&mut self) {
        for sync in self.pending.drain(..) {
            sync.signal();
        }
    }

    /// Number of successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

impl EffectRenderer for SoftwareRenderer {
    fn create_buffer(&mut self, size: Size<i32, Physical>) -> Result<PixelBuffer, RenderError> {
        if self.fail_allocations > 0 {
            if self.fail_after > 0 {
                self.fail_after -= 1;
            } else {
                self.fail_allocations -= 1;
                return Err(RenderError::OutOfMemory(size));
            }
        }

        let pixels = size.w.max(0) as usize * size.h.max(0) as usize;
        if self.max_buffer_pixels.is_some_and(|max| pixels > max) {
            return Err(RenderError::OutOfMemory(size));
        }

        self.allocations += 1;
        Ok(PixelBuffer::new(size))
    }

    fn submit(&mut self) -> SyncPoint {
        if self.defer_completion {
            let sync = SyncPoint::pending();
            self.pending.push(sync.clone());
            sync
        } else {
            SyncPoint::signaled()
        }
    }
}
