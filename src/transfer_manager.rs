use super::{
    remote::{PartUrlSigner, RemoteServiceProxy},
    ConcurrencyProvider, DataPartitionProvider, DummyResumableRecorder, FixedConcurrencyProvider,
    FixedDataPartitionProvider, LimitedDataPartitionProvider, LimitedRetrier, ObjectParams, PartLimits,
    PartPlanner, PartialFileCarver, ResumableRecorder, SessionOutcome, SourceKey, TaskRegistry, TempFileCarver,
    TransferError, TransferErrorKind, TransferResult, UploadSession,
};
use assert_impl::assert_impl;
use log::info;
use std::{
    fs::{canonicalize, metadata},
    num::NonZeroUsize,
    path::Path,
    sync::Arc,
};

const DEFAULT_CONCURRENCY: NonZeroUsize = super::part_planner::non_zero_usize(4);
const DEFAULT_THREAD_NAME_PREFIX: &str = "qiniu.rust-sdk.multipart-transfer.executor";

/// 传输管理器与它创建的所有会话共享的只读组件
#[derive(Debug)]
pub(crate) struct TransferContext {
    proxy: Arc<dyn RemoteServiceProxy>,
    signer: Arc<dyn PartUrlSigner>,
    carver: Arc<dyn PartialFileCarver>,
    data_partition_provider: Arc<dyn DataPartitionProvider>,
    concurrency_provider: Arc<dyn ConcurrencyProvider>,
    planner: PartPlanner,
    retrier: LimitedRetrier,
    resumable_recorder: Arc<dyn ResumableRecorder>,
    registry: Arc<TaskRegistry>,
    thread_name_prefix: String,
}

impl TransferContext {
    pub(crate) fn proxy(&self) -> &dyn RemoteServiceProxy {
        &*self.proxy
    }

    pub(crate) fn signer(&self) -> &dyn PartUrlSigner {
        &*self.signer
    }

    pub(crate) fn carver(&self) -> &dyn PartialFileCarver {
        &*self.carver
    }

    pub(crate) fn data_partition_provider(&self) -> &dyn DataPartitionProvider {
        &*self.data_partition_provider
    }

    pub(crate) fn concurrency_provider(&self) -> &dyn ConcurrencyProvider {
        &*self.concurrency_provider
    }

    pub(crate) fn retrier(&self) -> &LimitedRetrier {
        &self.retrier
    }

    pub(crate) fn resumable_recorder(&self) -> &dyn ResumableRecorder {
        &*self.resumable_recorder
    }

    pub(crate) fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub(crate) fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }
}

/// 分片传输管理器
///
/// 持有远端服务代理、URL 签发器、分片文件生成器和任务注册表，
/// 这些组件由它创建的所有会话只读共享。
#[derive(Debug, Clone)]
pub struct TransferManager(Arc<TransferContext>);

impl TransferManager {
    /// 创建分片传输管理构建器
    #[inline]
    pub fn builder(
        proxy: impl RemoteServiceProxy + 'static,
        signer: impl PartUrlSigner + 'static,
    ) -> TransferManagerBuilder {
        TransferManagerBuilder::new(proxy, signer)
    }

    /// 使用默认配置创建分片传输管理器
    #[inline]
    pub fn new(proxy: impl RemoteServiceProxy + 'static, signer: impl PartUrlSigner + 'static) -> Self {
        Self::builder(proxy, signer).build()
    }

    /// 为本地文件创建上传会话
    ///
    /// 源文件不存在或不是普通文件时返回 [`TransferErrorKind::FileSystemError`]，
    /// 无法规划分片时返回 [`TransferErrorKind::PlanningError`]。
    pub fn new_session(&self, source: impl AsRef<Path>, params: ObjectParams) -> TransferResult<UploadSession> {
        let source = canonicalize(source.as_ref())?;
        let metadata = metadata(&source)?;
        if !metadata.is_file() {
            return Err(TransferError::new_with_msg(
                TransferErrorKind::FileSystemError,
                format!("{} is not a regular file", source.display()),
            ));
        }
        let part_size = self.0.data_partition_provider().part_size();
        let plan = self.0.planner.plan(metadata.len(), part_size.as_u64())?;
        let source_key = SourceKey::from_source(
            &source,
            metadata.len(),
            metadata.modified().ok(),
            &params,
            plan.part_size(),
        );
        let session = UploadSession::new(self.0.to_owned(), source, params, plan, source_key);
        info!(
            "{} plans {} parts of {} bytes for {}",
            session.session_key(),
            session.plan().len(),
            session.plan().part_size(),
            session.source().display()
        );
        Ok(session)
    }

    /// 上传本地文件，阻塞直到上传结束
    #[inline]
    pub fn upload_path(&self, source: impl AsRef<Path>, params: ObjectParams) -> TransferResult<SessionOutcome> {
        self.new_session(source, params)?.start()
    }

    /// 获取任务注册表
    #[inline]
    pub fn task_registry(&self) -> &TaskRegistry {
        self.0.registry()
    }

    /// 获取分片规划器
    #[inline]
    pub fn part_planner(&self) -> &PartPlanner {
        &self.0.planner
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

/// 分片传输管理构建器
#[derive(Debug, Clone)]
pub struct TransferManagerBuilder {
    proxy: Arc<dyn RemoteServiceProxy>,
    signer: Arc<dyn PartUrlSigner>,
    carver: Option<Arc<dyn PartialFileCarver>>,
    data_partition_provider: Option<Arc<dyn DataPartitionProvider>>,
    concurrency_provider: Option<Arc<dyn ConcurrencyProvider>>,
    part_limits: PartLimits,
    retrier: LimitedRetrier,
    resumable_recorder: Option<Arc<dyn ResumableRecorder>>,
    registry: Option<Arc<TaskRegistry>>,
    thread_name_prefix: Option<String>,
}

impl TransferManagerBuilder {
    /// 创建分片传输管理构建器
    #[inline]
    pub fn new(proxy: impl RemoteServiceProxy + 'static, signer: impl PartUrlSigner + 'static) -> Self {
        Self {
            proxy: Arc::new(proxy),
            signer: Arc::new(signer),
            carver: None,
            data_partition_provider: None,
            concurrency_provider: None,
            part_limits: Default::default(),
            retrier: Default::default(),
            resumable_recorder: None,
            registry: None,
            thread_name_prefix: None,
        }
    }

    /// 设置分片文件生成器
    ///
    /// 默认使用 [`TempFileCarver`]
    #[inline]
    pub fn partial_file_carver(&mut self, carver: impl PartialFileCarver + 'static) -> &mut Self {
        self.carver = Some(Arc::new(carver));
        self
    }

    /// 设置分片大小提供者
    ///
    /// 默认使用 8 MiB 的固定分片大小，并限制在远端服务的分片大小约束之内
    #[inline]
    pub fn data_partition_provider(&mut self, provider: impl DataPartitionProvider + 'static) -> &mut Self {
        self.data_partition_provider = Some(Arc::new(provider));
        self
    }

    /// 设置并发数提供者
    ///
    /// 默认并发数为 4
    #[inline]
    pub fn concurrency_provider(&mut self, provider: impl ConcurrencyProvider + 'static) -> &mut Self {
        self.concurrency_provider = Some(Arc::new(provider));
        self
    }

    /// 设置远端服务的分片约束
    #[inline]
    pub fn part_limits(&mut self, part_limits: PartLimits) -> &mut Self {
        self.part_limits = part_limits;
        self
    }

    /// 设置分片上传重试策略
    ///
    /// 默认不重试
    #[inline]
    pub fn retrier(&mut self, retrier: LimitedRetrier) -> &mut Self {
        self.retrier = retrier;
        self
    }

    /// 设置断点恢复记录器
    ///
    /// 默认使用 [`DummyResumableRecorder`]，不记录也不恢复
    #[inline]
    pub fn resumable_recorder(&mut self, recorder: impl ResumableRecorder + 'static) -> &mut Self {
        self.resumable_recorder = Some(Arc::new(recorder));
        self
    }

    /// 设置任务注册表，可以在多个传输管理器之间共享
    #[inline]
    pub fn task_registry(&mut self, registry: Arc<TaskRegistry>) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// 设置执行器线程名称前缀
    #[inline]
    pub fn thread_name_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// 构建分片传输管理器
    pub fn build(&self) -> TransferManager {
        let part_limits = self.part_limits;
        TransferManager(Arc::new(TransferContext {
            proxy: self.proxy.to_owned(),
            signer: self.signer.to_owned(),
            carver: self
                .carver
                .to_owned()
                .unwrap_or_else(|| Arc::new(TempFileCarver::new())),
            data_partition_provider: self.data_partition_provider.to_owned().unwrap_or_else(|| {
                Arc::new(LimitedDataPartitionProvider::new_with_limits(
                    FixedDataPartitionProvider::default(),
                    &part_limits,
                ))
            }),
            concurrency_provider: self.concurrency_provider.to_owned().unwrap_or_else(|| {
                Arc::new(FixedConcurrencyProvider::new_with_non_zero_concurrency(
                    DEFAULT_CONCURRENCY,
                ))
            }),
            planner: PartPlanner::new(part_limits),
            retrier: self.retrier.to_owned(),
            resumable_recorder: self
                .resumable_recorder
                .to_owned()
                .unwrap_or_else(|| Arc::new(DummyResumableRecorder::new())),
            registry: self.registry.to_owned().unwrap_or_default(),
            thread_name_prefix: self
                .thread_name_prefix
                .to_owned()
                .unwrap_or_else(|| DEFAULT_THREAD_NAME_PREFIX.to_owned()),
        }))
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}
