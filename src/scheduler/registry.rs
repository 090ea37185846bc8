use super::{
    super::{session::SessionEvent, TransferError, TransferErrorKind, TransferResult},
    Mailbox,
};
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, warn};
use std::{
    fmt::{self, Display},
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Weak,
    },
};

/// 分片网络任务句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_test(handle: u64) -> Self {
        Self(handle)
    }
}

impl Display for TaskHandle {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// 会话 KEY
///
/// 进程内唯一，每个会话创建时生成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(u64);

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

impl SessionKey {
    pub(crate) fn generate() -> Self {
        Self(NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SessionKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// 任务路由，指向任务所属的会话和分片
#[derive(Debug, Clone)]
pub(crate) struct TaskRoute {
    session_key: SessionKey,
    part_number: NonZeroUsize,
    mailbox: Weak<Mailbox>,
}

impl TaskRoute {
    pub(crate) fn new(session_key: SessionKey, part_number: NonZeroUsize, mailbox: Weak<Mailbox>) -> Self {
        Self {
            session_key,
            part_number,
            mailbox,
        }
    }

    pub(crate) fn session_key(&self) -> SessionKey {
        self.session_key
    }

    pub(crate) fn part_number(&self) -> NonZeroUsize {
        self.part_number
    }

    /// 将事件投递给所属会话，会话已经释放时返回 `false`
    pub(crate) fn deliver(&self, event: SessionEvent) -> bool {
        self.mailbox.upgrade().map_or(false, |mailbox| mailbox.post(event))
    }
}

/// 任务注册表
///
/// 将网络任务句柄映射回所属的会话和分片，允许多个线程并发插入、删除和查找。
/// 同一个句柄同一时刻最多对应一个分片。
#[derive(Debug)]
pub struct TaskRegistry {
    next_handle: AtomicU64,
    entries: DashMap<TaskHandle, TaskRoute>,
}

impl Default for TaskRegistry {
    #[inline]
    fn default() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            entries: Default::default(),
        }
    }
}

impl TaskRegistry {
    /// 分配新的任务句柄
    #[inline]
    pub fn next_handle(&self) -> TaskHandle {
        TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, handle: TaskHandle, route: TaskRoute) -> TransferResult<()> {
        match self.entries.entry(handle) {
            Entry::Occupied(entry) => Err(TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!(
                    "{} is already registered to part {} of {}",
                    handle,
                    entry.get().part_number(),
                    entry.get().session_key()
                ),
            )),
            Entry::Vacant(entry) => {
                debug!(
                    "Register {} for part {} of {}",
                    handle,
                    route.part_number(),
                    route.session_key()
                );
                entry.insert(route);
                Ok(())
            }
        }
    }

    pub(crate) fn resolve(&self, handle: TaskHandle) -> Option<TaskRoute> {
        self.entries.get(&handle).map(|entry| entry.value().to_owned())
    }

    /// 任务句柄是否仍然有效
    #[inline]
    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// 移除任务句柄并返回其路由，每个句柄只会被成功移除一次
    pub(crate) fn take(&self, handle: TaskHandle) -> Option<TaskRoute> {
        self.entries.remove(&handle).map(|(_, route)| route)
    }

    /// 释放会话拥有的所有任务句柄，返回释放的数量
    pub fn release_session(&self, session_key: SessionKey) -> usize {
        let mut released = 0usize;
        self.entries.retain(|handle, route| {
            if route.session_key() == session_key {
                warn!(
                    "Release in-flight {} of part {} for {}",
                    handle,
                    route.part_number(),
                    session_key
                );
                released += 1;
                false
            } else {
                true
            }
        });
        released
    }

    /// 已注册的任务句柄数量
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use crossbeam_channel::unbounded;
    use std::{sync::Arc, thread::spawn as thread_spawn};

    fn part_number(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_task_registry_routes_and_releases() -> Result<()> {
        let registry = TaskRegistry::default();
        let (sender, receiver) = unbounded();
        let mailbox = Arc::new(Mailbox::new(SessionKey::generate(), sender));
        let other_key = SessionKey::generate();

        let h1 = registry.next_handle();
        let h2 = registry.next_handle();
        let h3 = registry.next_handle();
        assert_ne!(h1, h2);
        registry.register(h1, TaskRoute::new(mailbox.session_key(), part_number(1), Arc::downgrade(&mailbox)))?;
        registry.register(h2, TaskRoute::new(mailbox.session_key(), part_number(2), Arc::downgrade(&mailbox)))?;
        registry.register(h3, TaskRoute::new(other_key, part_number(1), Weak::new()))?;
        assert_eq!(
            registry
                .register(h1, TaskRoute::new(other_key, part_number(9), Weak::new()))
                .unwrap_err()
                .kind(),
            TransferErrorKind::StateError
        );
        assert_eq!(registry.resolve(h1).map(|route| route.part_number()), Some(part_number(1)));

        let route = registry.take(h1).unwrap();
        assert!(registry.take(h1).is_none());
        assert!(route.deliver(SessionEvent::CancelRequested));
        assert!(matches!(receiver.try_recv()?, SessionEvent::CancelRequested));

        assert_eq!(registry.release_session(mailbox.session_key()), 1);
        assert!(!registry.contains(h2));
        assert!(registry.contains(h3));
        assert_eq!(registry.len(), 1);

        let route = registry.take(h3).unwrap();
        assert!(!route.deliver(SessionEvent::CancelRequested));
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn test_task_registry_concurrent_insert_remove() {
        let registry = Arc::new(TaskRegistry::default());
        let session_key = SessionKey::generate();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.to_owned();
                thread_spawn(move || {
                    for n in 1..=100 {
                        let handle = registry.next_handle();
                        registry
                            .register(handle, TaskRoute::new(session_key, part_number(n), Weak::new()))
                            .unwrap();
                        assert_eq!(registry.take(handle).map(|route| route.part_number()), Some(part_number(n)));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
