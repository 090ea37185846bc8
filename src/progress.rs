use crossbeam_utils::Backoff;
use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, RwLock, TryLockError},
};

/// 会话上传进度
///
/// 多个分片任务并发更新各自的进度，读取时汇总为整个会话已经上传的字节数。
#[derive(Clone, Debug, Default)]
pub(crate) struct Progresses(Arc<RwLock<ProgressesInner>>);

#[derive(Debug, Default)]
struct ProgressesInner {
    uploaded: u64,
    map: HashMap<NonZeroUsize, u64>,
}

impl Progresses {
    pub(crate) fn start_part(&self, part_number: NonZeroUsize) {
        self.try_write(move |inner| {
            inner.map.insert(part_number, 0);
        })
    }

    pub(crate) fn update_part(&self, part_number: NonZeroUsize, uploaded: u64) -> bool {
        self.try_write(move |inner| {
            if let Some(value) = inner.map.get_mut(&part_number) {
                *value = uploaded;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn complete_part(&self, part_number: NonZeroUsize, part_size: u64) -> bool {
        self.try_write(move |inner| {
            if inner.map.remove(&part_number).is_some() {
                inner.uploaded += part_size;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn delete_part(&self, part_number: NonZeroUsize) -> bool {
        self.try_write(move |inner| inner.map.remove(&part_number).is_some())
    }

    /// 记录断点恢复的分片
    pub(crate) fn add_resumed(&self, size: u64) {
        self.try_write(move |inner| inner.uploaded += size)
    }

    pub(crate) fn current_uploaded(&self) -> u64 {
        self.try_read(|inner| inner.uploaded + inner.map.values().sum::<u64>())
    }

    fn try_write<F: FnOnce(&mut ProgressesInner) -> T, T>(&self, f: F) -> T {
        let backoff = Backoff::new();
        loop {
            match self.0.try_write() {
                Ok(mut inner) => return f(&mut inner),
                Err(TryLockError::Poisoned(poisoned)) => return f(&mut poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => backoff.spin(),
            }
        }
    }

    fn try_read<F: FnOnce(&ProgressesInner) -> T, T>(&self, f: F) -> T {
        let backoff = Backoff::new();
        loop {
            match self.0.try_read() {
                Ok(inner) => return f(&inner),
                Err(TryLockError::Poisoned(poisoned)) => return f(&poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => backoff.spin(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::spawn as thread_spawn;

    const PART_SIZE: u64 = 1 << 20;

    #[test]
    fn test_progresses() {
        let progresses = Progresses::default();
        progresses.add_resumed(PART_SIZE);

        let threads: Vec<_> = (1..=3)
            .map(|n| {
                let part_number = NonZeroUsize::new(n).unwrap();
                let progresses = progresses.to_owned();
                progresses.start_part(part_number);
                thread_spawn(move || {
                    for uploaded in (0..=PART_SIZE).step_by(4096) {
                        assert!(progresses.update_part(part_number, uploaded));
                    }
                    assert!(progresses.complete_part(part_number, PART_SIZE));
                    assert!(!progresses.complete_part(part_number, PART_SIZE));
                })
            })
            .collect();

        let mut last_uploaded = 0u64;
        loop {
            let current_uploaded = progresses.current_uploaded();
            assert!(current_uploaded >= last_uploaded);
            assert!(current_uploaded <= 4 * PART_SIZE);
            if current_uploaded >= 4 * PART_SIZE {
                break;
            }
            last_uploaded = current_uploaded;
        }

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(progresses.current_uploaded(), 4 * PART_SIZE);
        assert!(!progresses.delete_part(NonZeroUsize::new(1).unwrap()));
    }
}
