use super::{
    progress::Progresses,
    remote::{AbortUploadRequest, CompleteUploadRequest, CompletedPart, CreateUploadRequest, UploadId},
    scheduler::{CancellationFlag, DispatchContext, Mailbox, PartJob, SessionKey, TransferExecutor},
    transfer_manager::TransferContext,
    Concurrency, ConcurrencyProviderFeedback, DataPartitionProviderFeedback, ObjectParams, PartPlan, SourceKey,
    TransferError, TransferErrorKind, TransferResult,
};
use anyhow::Result as AnyResult;
use assert_impl::assert_impl;
use crossbeam_channel::{unbounded, Receiver};
use log::{debug, error, info, warn};
use std::{
    collections::VecDeque,
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
    time::{Duration, Instant},
};

mod callbacks;
mod outcome;
mod record;
mod state;

pub use callbacks::TransferEvent;
pub use outcome::{RemoteUploadState, SessionOutcome};
pub(crate) use state::SessionEvent;
pub use state::{PartState, SessionState};

use callbacks::Callbacks;
use record::SessionRecorder;
use state::{Command, Notice, SessionMachine};

/// 上传会话
///
/// 将一个本地文件上传为一个远端对象。会话只能启动一次，
/// [`UploadSession::start`] 在调用者线程上驱动状态机，直到会话到达终止状态才返回。
/// 分片任务在执行器线程上并发运行，它们的结果通过会话收件箱串行地交给状态机处理。
#[derive(Debug)]
pub struct UploadSession {
    session_key: SessionKey,
    source: PathBuf,
    params: Arc<ObjectParams>,
    plan: PartPlan,
    source_key: SourceKey,
    context: Arc<TransferContext>,
    state: Mutex<SessionState>,
    started: AtomicBool,
    cancel: CancellationFlag,
    mailbox: Arc<Mailbox>,
    receiver: Receiver<SessionEvent>,
    callbacks: Callbacks,
}

impl UploadSession {
    pub(crate) fn new(
        context: Arc<TransferContext>,
        source: PathBuf,
        params: ObjectParams,
        plan: PartPlan,
        source_key: SourceKey,
    ) -> Self {
        let session_key = SessionKey::generate();
        let (sender, receiver) = unbounded();
        Self {
            session_key,
            source,
            params: Arc::new(params),
            plan,
            source_key,
            context,
            state: Default::default(),
            started: AtomicBool::new(false),
            cancel: Default::default(),
            mailbox: Arc::new(Mailbox::new(session_key, sender)),
            receiver,
            callbacks: Default::default(),
        }
    }

    #[inline]
    pub fn session_key(&self) -> SessionKey {
        self.session_key
    }

    /// 获取源文件路径
    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[inline]
    pub fn params(&self) -> &ObjectParams {
        &self.params
    }

    /// 获取分片规划
    #[inline]
    pub fn plan(&self) -> &PartPlan {
        &self.plan
    }

    /// 获取数据源 KEY
    #[inline]
    pub fn source_key(&self) -> &SourceKey {
        &self.source_key
    }

    /// 获取会话当前状态
    #[inline]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 注册传输事件回调函数
    ///
    /// 回调函数在驱动会话的线程上依次调用。
    /// 非终止事件的回调函数返回错误将导致会话被取消，终止事件的回调函数返回的错误仅被记录。
    #[inline]
    pub fn on_event(
        &mut self,
        callback: impl Fn(&TransferEvent<'_>) -> AnyResult<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.callbacks.insert_event_callback(callback);
        self
    }

    /// 取消会话
    ///
    /// 可以在任意线程上调用，可以重复调用。
    /// 远端分片上传已经创建时，会话将取消所有分片任务并取消远端分片上传。
    #[inline]
    pub fn cancel(&self) {
        self.canceller().cancel()
    }

    /// 获取会话取消器，可以移动到其他线程中使用
    #[inline]
    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            session_key: self.session_key,
            cancel: self.cancel.to_owned(),
            mailbox: Arc::downgrade(&self.mailbox),
        }
    }

    /// 启动会话，阻塞直到会话到达终止状态
    ///
    /// 重复启动返回 [`TransferErrorKind::StateError`]，不会再次创建远端分片上传。
    /// 会话的失败和取消都体现在返回的 [`SessionOutcome`] 中。
    pub fn start(&self) -> TransferResult<SessionOutcome> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!("{} is already started", self.session_key),
            ));
        }
        let begin_at = Instant::now();
        let mut machine = SessionMachine::new(self.session_key, &self.plan);
        machine.start()?;
        self.sync_state(&machine);

        let concurrency = self
            .context
            .concurrency_provider()
            .concurrency()
            .limit_to_parts(self.plan.len());
        let mut driver = SessionDriver::new(self, concurrency);
        driver.create_upload();
        driver.run(&mut machine);
        drop(driver);

        let uploaded_size = machine.uploaded_size();
        let outcome = machine.into_outcome()?;
        info!(
            "{} of {} finished as {:?} in {:?}",
            self.session_key,
            self.source.display(),
            outcome.state(),
            begin_at.elapsed()
        );
        if let Err(err) = self.callbacks.event(&TransferEvent::from_outcome(&outcome)) {
            warn!("Terminal event callback of {} returned error: {}", self.session_key, err);
        }
        self.feedback(concurrency, uploaded_size, begin_at.elapsed(), outcome.error());
        Ok(outcome)
    }

    fn feedback(
        &self,
        concurrency: Concurrency,
        uploaded_size: u64,
        elapsed: Duration,
        error: Option<&TransferError>,
    ) {
        if let Some(uploaded_size) = NonZeroU64::new(uploaded_size) {
            self.context
                .concurrency_provider()
                .feedback(ConcurrencyProviderFeedback::new(
                    concurrency,
                    uploaded_size,
                    elapsed,
                    error,
                ));
        }
        self.context
            .data_partition_provider()
            .feedback(DataPartitionProviderFeedback::new(
                self.plan.part_size(),
                elapsed,
                error,
            ));
    }

    fn sync_state(&self, machine: &SessionMachine) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = machine.state();
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

/// 会话取消器
#[derive(Debug, Clone)]
pub struct SessionCanceller {
    session_key: SessionKey,
    cancel: CancellationFlag,
    mailbox: Weak<Mailbox>,
}

impl SessionCanceller {
    #[inline]
    pub fn session_key(&self) -> SessionKey {
        self.session_key
    }

    /// 取消会话
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancel {}", self.session_key);
        }
        self.cancel.cancel();
        if let Some(mailbox) = self.mailbox.upgrade() {
            mailbox.post(SessionEvent::CancelRequested);
        }
    }
}

/// 执行状态机产生的命令
///
/// 远端的创建、完成和取消请求都在驱动线程上同步执行，结果作为事件放回本地队列。
struct SessionDriver<'s> {
    session: &'s UploadSession,
    recorder: SessionRecorder<'s>,
    queue: VecDeque<SessionEvent>,
    executor: TransferResult<TransferExecutor>,
    dispatch_context: Option<Arc<DispatchContext>>,
    progresses: Progresses,
}

impl<'s> SessionDriver<'s> {
    fn new(session: &'s UploadSession, concurrency: Concurrency) -> Self {
        Self {
            session,
            recorder: SessionRecorder::new(
                session.context.resumable_recorder(),
                session.source_key.to_owned(),
            ),
            queue: VecDeque::new(),
            executor: TransferExecutor::new(concurrency, session.context.thread_name_prefix()),
            dispatch_context: None,
            progresses: Default::default(),
        }
    }

    fn create_upload(&mut self) {
        let session = self.session;
        if let Err(err) = &self.executor {
            error!("Failed to spawn executor for {}: {}", session.session_key, err);
            let error = TransferError::new_with_msg(TransferErrorKind::SystemCallError, err.to_string());
            self.queue.push_back(SessionEvent::CreateFailed { error });
            return;
        }
        if session.cancel.is_cancelled() {
            self.queue.push_back(SessionEvent::CreateFailed {
                error: TransferError::new_with_msg(
                    TransferErrorKind::UserCanceled,
                    format!("{} was cancelled before the upload was created", session.session_key),
                ),
            });
            return;
        }

        if let Some(resumed) = self.recorder.load(&session.plan, &session.params) {
            let resumed_size = resumed
                .parts
                .iter()
                .filter_map(|completed| session.plan.part(completed.part_number()))
                .map(|part| part.size().get())
                .sum();
            self.progresses.add_resumed(resumed_size);
            self.push_created(resumed.upload_id, resumed.parts);
            return;
        }

        info!(
            "Create multipart upload of {} for {}/{}",
            session.session_key,
            session.params.bucket(),
            session.params.key()
        );
        let result = session
            .context
            .proxy()
            .create_upload(&CreateUploadRequest::new(&session.params))
            .and_then(|created| {
                created.into_upload_id().ok_or_else(|| {
                    TransferError::new_with_msg(
                        TransferErrorKind::RemoteProtocolError,
                        "create upload response carries no upload id",
                    )
                })
            });
        match result {
            Ok(upload_id) => {
                info!("Multipart upload {} is created for {}", upload_id, session.session_key);
                self.recorder.start_new(&upload_id, &session.plan, &session.params);
                self.push_created(upload_id, Vec::new());
            }
            Err(error) => {
                warn!("Failed to create multipart upload for {}: {}", session.session_key, error);
                self.queue.push_back(SessionEvent::CreateFailed { error });
            }
        }
    }

    fn push_created(&mut self, upload_id: UploadId, resumed: Vec<CompletedPart>) {
        if self.session.cancel.is_cancelled() {
            self.queue.push_back(SessionEvent::CancelRequested);
        }
        self.queue.push_back(SessionEvent::Created { upload_id, resumed });
    }

    fn run(&mut self, machine: &mut SessionMachine) {
        while !machine.is_finished() {
            let commands = match self.next_event() {
                Ok(event) => match machine.apply(event) {
                    Ok(commands) => commands,
                    Err(err) => machine.fail(err),
                },
                Err(err) => machine.fail(err),
            };
            self.session.sync_state(machine);
            for command in commands {
                self.execute(command, machine);
            }
        }
    }

    fn next_event(&mut self) -> TransferResult<SessionEvent> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(event);
        }
        self.session.receiver.recv().map_err(|err| {
            TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!("mailbox of {} is disconnected: {}", self.session.session_key, err),
            )
        })
    }

    fn execute(&mut self, command: Command, machine: &SessionMachine) {
        let session = self.session;
        match command {
            Command::Notify(notice) => self.notify(notice),
            Command::Dispatch(parts) => {
                let context = match self.dispatch_context(machine) {
                    Ok(context) => context,
                    Err(error) => {
                        if let Some(part) = parts.first() {
                            self.queue.push_back(SessionEvent::PartFailed {
                                part_number: part.part_number(),
                                error,
                            });
                        }
                        return;
                    }
                };
                if let Ok(executor) = &self.executor {
                    info!(
                        "Dispatch {} parts of {} with concurrency {}",
                        parts.len(),
                        session.session_key,
                        executor.concurrency().as_usize()
                    );
                    for part in parts {
                        executor.dispatch(PartJob::new(context.to_owned(), part));
                    }
                }
            }
            Command::PersistPart { part, etag } => self.recorder.persist_part(&part, &etag),
            Command::Complete { upload_id, parts } => {
                info!(
                    "Complete multipart upload {} with {} parts",
                    upload_id,
                    parts.len()
                );
                let request = CompleteUploadRequest::new(&session.params, &upload_id, &parts);
                let event = match session.context.proxy().complete_upload(&request) {
                    Ok(()) => SessionEvent::CompleteSucceeded,
                    Err(error) => {
                        warn!("Failed to complete multipart upload {}: {}", upload_id, error);
                        SessionEvent::CompleteFailed { error }
                    }
                };
                self.queue.push_back(event);
            }
            Command::Abort { upload_id } => {
                info!("Abort multipart upload {}", upload_id);
                let request = AbortUploadRequest::new(&session.params, &upload_id);
                let error = session.context.proxy().abort_upload(&request).err();
                if let Some(err) = &error {
                    error!(
                        "Failed to abort multipart upload {}, it may need manual cleanup: {}",
                        upload_id, err
                    );
                }
                self.queue.push_back(SessionEvent::AbortFinished { error });
            }
            Command::ReleaseTasks => {
                session.cancel.cancel();
                let released = session.context.registry().release_session(session.session_key);
                debug!("Released {} tasks of {}", released, session.session_key);
            }
            Command::DiscardRecord => self.recorder.discard(),
        }
    }

    fn dispatch_context(&mut self, machine: &SessionMachine) -> TransferResult<Arc<DispatchContext>> {
        if let Some(context) = &self.dispatch_context {
            return Ok(context.to_owned());
        }
        let session = self.session;
        let upload_id = machine.upload_id().ok_or_else(|| {
            TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!("{} dispatches parts without upload id", session.session_key),
            )
        })?;
        if let Err(err) = &self.executor {
            return Err(TransferError::new_with_msg(
                TransferErrorKind::SystemCallError,
                err.to_string(),
            ));
        }
        let context = Arc::new(DispatchContext::new(
            session.context.to_owned(),
            session.params.to_owned(),
            session.source.to_owned(),
            upload_id.to_owned(),
            session.session_key,
            session.cancel.to_owned(),
            Arc::downgrade(&session.mailbox),
            self.progresses.to_owned(),
        ));
        self.dispatch_context = Some(context.to_owned());
        Ok(context)
    }

    fn notify(&mut self, notice: Notice) {
        let session = self.session;
        let result = match &notice {
            Notice::Created {
                upload_id,
                resumed_parts,
            } => session.callbacks.event(&TransferEvent::Created {
                upload_id,
                resumed_parts: *resumed_parts,
            }),
            Notice::PartStarted { part_number } => match session.plan.part(*part_number) {
                Some(part) => session.callbacks.event(&TransferEvent::PartStarted { part }),
                None => Ok(()),
            },
            Notice::PartProgress {
                part_number,
                uploaded,
            } => match session.plan.part(*part_number) {
                Some(part) => session.callbacks.event(&TransferEvent::PartProgress {
                    part,
                    uploaded: *uploaded,
                    session_uploaded: self.progresses.current_uploaded(),
                    total_size: session.plan.file_size().get(),
                }),
                None => Ok(()),
            },
            Notice::PartCompleted { part_number, etag } => match session.plan.part(*part_number) {
                Some(part) => session.callbacks.event(&TransferEvent::PartCompleted { part, etag }),
                None => Ok(()),
            },
        };
        if let Err(err) = result {
            warn!(
                "Event callback of {} returned error, cancel the session: {}",
                session.session_key, err
            );
            session.cancel.cancel();
            self.queue.push_back(SessionEvent::CancelRequested);
        }
    }
}
