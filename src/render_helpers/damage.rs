//! 背景特效的失效跟踪。
//!
//! - [`ExtraDamage`]: 表面特效选项或圆角变化时递增的提交计数，供输出的损伤跟踪器重绘该区域
//! - [`BackdropDamage`]: 每个输出一份的脏标记，背景（壁纸、Background/Bottom 层表面）
//!   发生变化时置位，只有快照存储在成功刷新后才会清除

use bitflags::bitflags;

/// Damage that does not come from surface commits, such as effect option changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtraDamage {
    commit: u64,
}

impl ExtraDamage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the whole effect area as damaged.
    pub fn damage_all(&mut self) {
        self.commit = self.commit.wrapping_add(1);
    }

    pub fn commit(&self) -> u64 {
        self.commit
    }
}

bitflags! {
    /// Why the backdrop of an output was invalidated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackdropChange: u32 {
        const BACKDROP_COLOR = 1 << 0;
        const LAYER_MAPPED = 1 << 1;
        const LAYER_UNMAPPED = 1 << 2;
        /// A backdrop surface moved or got resized.
        const LAYER_GEOMETRY = 1 << 3;
        /// A backdrop surface redrew.
        const LAYER_COMMIT = 1 << 4;
        /// Global blur options changed.
        const CONFIG = 1 << 5;
        const OUTPUT_RESIZED = 1 << 6;
    }
}

/// Per-output dirty flag of the background snapshot.
#[derive(Debug)]
pub struct BackdropDamage {
    changes: BackdropChange,
}

impl Default for BackdropDamage {
    fn default() -> Self {
        Self::new()
    }
}

impl BackdropDamage {
    /// Starts out dirty since there's no snapshot yet.
    pub fn new() -> Self {
        Self {
            changes: BackdropChange::OUTPUT_RESIZED,
        }
    }

    pub fn mark(&mut self, change: BackdropChange) {
        if !self.changes.contains(change) {
            trace!("backdrop damaged: {change:?}");
        }
        self.changes |= change;
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Changes accumulated since the last snapshot refresh.
    pub fn changes(&self) -> BackdropChange {
        self.changes
    }

    /// Only called by the snapshot store once it has refreshed the snapshot.
    pub(super) fn clear(&mut self) {
        self.changes = BackdropChange::empty();
    }
}
