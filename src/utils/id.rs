// 文件: utils/id.rs
// 作用: 全局唯一 ID 的分配，供输出、表面、渲染实例和特效缓冲区使用

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter that returns unique IDs.
pub struct IdCounter {
    value: AtomicU64,
}

impl IdCounter {
    pub const fn new() -> Self {
        Self {
            // Start from 1 to reduce the possibility that some other code that uses these IDs will
            // get confused.
            value: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a `Copy` newtype ID backed by its own static [`IdCounter`].
macro_rules! unique_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(u64);

        impl $name {
            pub fn next() -> Self {
                static COUNTER: $crate::utils::id::IdCounter = $crate::utils::id::IdCounter::new();
                Self(COUNTER.next())
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }
    };
}

pub(crate) use unique_id;

#[cfg(test)]
mod tests {
    use super::*;

    unique_id! {
        struct TestId;
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = TestId::next();
        let b = TestId::next();
        assert_ne!(a, b);
        assert!(a < b);
        assert!(a.get() >= 1);
    }
}
