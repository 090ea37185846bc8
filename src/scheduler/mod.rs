use super::session::SessionEvent;
use crossbeam_channel::Sender;
use log::debug;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::sleep,
    time::{Duration, Instant},
};

const CANCELLABLE_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// 取消标记
///
/// 会话与它派发的所有分片任务共享同一个取消标记，一旦设置便不可撤销。
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// 设置取消标记
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 是否已经取消
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 等待指定时长，期间被取消则提前返回 `false`
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep((deadline - now).min(CANCELLABLE_SLEEP_SLICE));
        }
    }
}

/// 会话的事件收件箱
///
/// 由会话独占持有，分片任务和任务注册表只持有其弱引用。
#[derive(Debug)]
pub(crate) struct Mailbox {
    session_key: SessionKey,
    sender: Sender<SessionEvent>,
}

impl Mailbox {
    pub(crate) fn new(session_key: SessionKey, sender: Sender<SessionEvent>) -> Self {
        Self { session_key, sender }
    }

    #[cfg(test)]
    pub(crate) fn session_key(&self) -> SessionKey {
        self.session_key
    }

    pub(crate) fn post(&self, event: SessionEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(err) => {
                debug!("{} no longer receives events, drop {:?}", self.session_key, err.into_inner());
                false
            }
        }
    }
}

mod executor;
mod registry;

pub(crate) use executor::{DispatchContext, PartJob};
pub use executor::TransferExecutor;
pub use registry::{SessionKey, TaskHandle, TaskRegistry};
pub(crate) use registry::TaskRoute;

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread::spawn as thread_spawn;

    #[test]
    fn test_cancellation_flag_interrupts_sleep() {
        let flag = CancellationFlag::default();
        assert!(flag.sleep(Duration::from_millis(1)));

        let cloned = flag.to_owned();
        let thread = thread_spawn(move || cloned.sleep(Duration::from_secs(60)));
        sleep(Duration::from_millis(20));
        flag.cancel();
        assert!(!thread.join().unwrap());
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_mailbox_post_after_session_ended() {
        let (sender, receiver) = unbounded();
        let mailbox = Mailbox::new(SessionKey::generate(), sender);
        assert!(mailbox.post(SessionEvent::CancelRequested));
        assert!(matches!(receiver.try_recv(), Ok(SessionEvent::CancelRequested)));

        drop(receiver);
        assert!(!mailbox.post(SessionEvent::CancelRequested));
    }
}
