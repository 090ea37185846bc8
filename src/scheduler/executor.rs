use super::{
    super::{
        progress::Progresses,
        remote::{UploadId, UploadPartRequest},
        session::SessionEvent,
        transfer_manager::TransferContext,
        Concurrency, ObjectParams, Part, PartialFile, TransferError, TransferErrorKind, TransferResult,
    },
    CancellationFlag, Mailbox, SessionKey, TaskHandle, TaskRoute,
};
use log::{debug, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    sync::{Arc, Weak},
};
use url::Url;

/// 分片传输执行器
///
/// 由固定数量线程组成的线程池，最多同时执行 K 个分片任务，多出的任务按照提交顺序排队。
#[derive(Debug)]
pub struct TransferExecutor {
    thread_pool: ThreadPool,
    concurrency: Concurrency,
}

impl TransferExecutor {
    /// 创建分片传输执行器
    ///
    /// 线程池创建失败时返回 [`TransferErrorKind::SystemCallError`]。
    pub fn new(concurrency: Concurrency, thread_name_prefix: &str) -> TransferResult<Self> {
        let thread_name_prefix = thread_name_prefix.to_owned();
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(concurrency.as_usize())
            .thread_name(move |i| format!("{}.{}", thread_name_prefix, i))
            .build()
            .map_err(|err| TransferError::new(TransferErrorKind::SystemCallError, err))?;
        Ok(Self {
            thread_pool,
            concurrency,
        })
    }

    #[inline]
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub(crate) fn dispatch(&self, job: PartJob) {
        debug!(
            "Dispatch part {} of {}",
            job.part.part_number(),
            job.context.session_key
        );
        self.thread_pool.spawn_fifo(move || job.run());
    }
}

/// 一次分片派发共享的上下文
#[derive(Debug)]
pub(crate) struct DispatchContext {
    services: Arc<TransferContext>,
    params: Arc<ObjectParams>,
    source: PathBuf,
    upload_id: UploadId,
    session_key: SessionKey,
    cancel: CancellationFlag,
    mailbox: Weak<Mailbox>,
    progresses: Progresses,
}

impl DispatchContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        services: Arc<TransferContext>,
        params: Arc<ObjectParams>,
        source: PathBuf,
        upload_id: UploadId,
        session_key: SessionKey,
        cancel: CancellationFlag,
        mailbox: Weak<Mailbox>,
        progresses: Progresses,
    ) -> Self {
        Self {
            services,
            params,
            source,
            upload_id,
            session_key,
            cancel,
            mailbox,
            progresses,
        }
    }

    fn post(&self, event: SessionEvent) -> bool {
        self.mailbox.upgrade().map_or(false, |mailbox| mailbox.post(event))
    }
}

/// 分片任务
///
/// 依次执行：生成分片临时文件，签发上传 URL，注册任务句柄，上传分片。
/// 每一步之前检查取消标记，一旦取消便不再进入网络上传步骤。
/// 任何一个分片失败都会设置取消标记，同一会话尚未开始的分片不再执行。
#[derive(Debug)]
pub(crate) struct PartJob {
    context: Arc<DispatchContext>,
    part: Part,
}

impl PartJob {
    pub(crate) fn new(context: Arc<DispatchContext>, part: Part) -> Self {
        Self { context, part }
    }

    fn run(self) {
        let part_number = self.part.part_number();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.run_steps())) {
            warn!("Task of part {} panicked: {:?}", part_number, panic);
            if !self.context.cancel.is_cancelled() {
                self.context.cancel.cancel();
                self.context.post(SessionEvent::PartFailed {
                    part_number,
                    error: TransferError::new_with_msg(TransferErrorKind::SystemCallError, "part task panicked"),
                });
            }
        }
    }

    fn run_steps(&self) {
        let ctx = &*self.context;
        let part_number = self.part.part_number();
        if self.skip_if_cancelled("carving") {
            return;
        }
        ctx.post(SessionEvent::PartCarving { part_number });

        let partial_file =
            match ctx
                .services
                .carver()
                .carve(&ctx.source, self.part.offset(), self.part.size(), &ctx.cancel)
            {
                Ok(partial_file) => partial_file,
                Err(err) => {
                    self.report_failure(err);
                    return;
                }
            };
        if self.skip_if_cancelled("signing") {
            return;
        }

        let url = match ctx
            .services
            .signer()
            .sign_upload_part(&ctx.params, &ctx.upload_id, part_number)
        {
            Ok(url) => url,
            Err(err) => {
                self.report_failure(err);
                return;
            }
        };
        if self.skip_if_cancelled("uploading") {
            return;
        }

        let registry = ctx.services.registry();
        let handle = registry.next_handle();
        if let Err(err) = registry.register(
            handle,
            TaskRoute::new(ctx.session_key, part_number, ctx.mailbox.to_owned()),
        ) {
            self.report_failure(err);
            return;
        }
        // 注册后再检查一次，避免在会话释放任务句柄之后留下残余的注册项
        if ctx.cancel.is_cancelled() {
            registry.take(handle);
            debug!("Part {} of {} was cancelled before uploading", part_number, ctx.session_key);
            return;
        }
        ctx.progresses.start_part(part_number);
        ctx.post(SessionEvent::PartStarted {
            part_number,
            task: handle,
        });

        let result = self.upload(&partial_file, &url, handle);
        drop(partial_file);

        match registry.take(handle) {
            Some(route) => {
                let event = match result {
                    Ok(etag) => {
                        ctx.progresses.complete_part(part_number, self.part.size().get());
                        SessionEvent::PartCompleted { part_number, etag }
                    }
                    Err(error) => {
                        ctx.progresses.delete_part(part_number);
                        ctx.cancel.cancel();
                        SessionEvent::PartFailed { part_number, error }
                    }
                };
                if !route.deliver(event) {
                    warn!("{} of part {} outlived its session", handle, part_number);
                }
            }
            None => {
                warn!(
                    "Discard late result of {} for part {} of {}: {:?}",
                    handle,
                    part_number,
                    ctx.session_key,
                    result.as_ref().map(|_| ())
                );
            }
        }
    }

    fn upload(&self, partial_file: &PartialFile, url: &Url, handle: TaskHandle) -> TransferResult<String> {
        let ctx = &*self.context;
        let part_number = self.part.part_number();
        let registry = ctx.services.registry();
        let retrier = ctx.services.retrier();
        let request = UploadPartRequest::new(&ctx.params, &ctx.upload_id, part_number, url, partial_file);
        let on_progress = |uploaded: u64| {
            if let Some(route) = registry.resolve(handle) {
                ctx.progresses.update_part(part_number, uploaded);
                route.deliver(SessionEvent::PartProgress { part_number, uploaded });
            }
        };

        let mut retried = 0usize;
        loop {
            info!(
                "Upload part {} ({} bytes) of {} with {}",
                part_number,
                self.part.size(),
                ctx.upload_id,
                handle
            );
            match ctx.services.proxy().upload_part(&request, &on_progress) {
                Ok(response) => {
                    let etag = response.into_etag();
                    return if etag.trim().is_empty() {
                        Err(TransferError::new_with_msg(
                            TransferErrorKind::RemoteProtocolError,
                            format!("upload part {} response carries no etag", part_number),
                        ))
                    } else {
                        Ok(etag)
                    };
                }
                Err(err) if retrier.should_retry(&err, retried) && !ctx.cancel.is_cancelled() => {
                    let delay = retrier.delay(retried);
                    warn!(
                        "Upload part {} failed, retry #{} after {:?}: {}",
                        part_number,
                        retried + 1,
                        delay,
                        err
                    );
                    ctx.progresses.update_part(part_number, 0);
                    if !ctx.cancel.sleep(delay) {
                        return Err(err);
                    }
                    retried += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn skip_if_cancelled(&self, step: &str) -> bool {
        let cancelled = self.context.cancel.is_cancelled();
        if cancelled {
            debug!(
                "Skip {} part {} of {}, session is cancelled",
                step,
                self.part.part_number(),
                self.context.session_key
            );
        }
        cancelled
    }

    fn report_failure(&self, error: TransferError) {
        let part_number = self.part.part_number();
        if self.context.cancel.is_cancelled() {
            debug!(
                "Part {} of {} stopped after cancellation: {}",
                part_number, self.context.session_key, error
            );
        } else {
            warn!("Part {} of {} failed: {}", part_number, self.context.session_key, error);
            self.context.cancel.cancel();
            self.context.post(SessionEvent::PartFailed { part_number, error });
        }
    }
}
