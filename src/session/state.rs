use super::{
    super::{
        remote::{CompletedPart, UploadId},
        scheduler::{SessionKey, TaskHandle},
        Part, PartPlan, TransferError, TransferErrorKind, TransferResult,
    },
    RemoteUploadState, SessionOutcome,
};
use log::{debug, warn};
use std::num::NonZeroUsize;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// 尚未开始
    Idle,

    /// 正在创建远端分片上传
    Creating,

    /// 远端分片上传已经创建
    Created,

    /// 正在上传分片
    UploadingParts,

    /// 正在完成远端分片上传
    Completing,

    /// 上传成功
    Completed,

    /// 正在取消远端分片上传
    Aborting,

    /// 已经取消
    Aborted,

    /// 上传失败
    Failed,
}

impl SessionState {
    /// 是否是终止状态
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

impl Default for SessionState {
    #[inline]
    fn default() -> Self {
        Self::Idle
    }
}

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartState {
    Pending,
    CarvingFile,
    Started,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PartState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// 驱动会话状态机的事件
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Created {
        upload_id: UploadId,
        resumed: Vec<CompletedPart>,
    },
    CreateFailed {
        error: TransferError,
    },
    PartCarving {
        part_number: NonZeroUsize,
    },
    PartStarted {
        part_number: NonZeroUsize,
        task: TaskHandle,
    },
    PartProgress {
        part_number: NonZeroUsize,
        uploaded: u64,
    },
    PartCompleted {
        part_number: NonZeroUsize,
        etag: String,
    },
    PartFailed {
        part_number: NonZeroUsize,
        error: TransferError,
    },
    CompleteSucceeded,
    CompleteFailed {
        error: TransferError,
    },
    CancelRequested,
    AbortFinished {
        error: Option<TransferError>,
    },
}

/// 需要通知给回调函数的非终止事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notice {
    Created {
        upload_id: UploadId,
        resumed_parts: usize,
    },
    PartStarted {
        part_number: NonZeroUsize,
    },
    PartProgress {
        part_number: NonZeroUsize,
        uploaded: u64,
    },
    PartCompleted {
        part_number: NonZeroUsize,
        etag: String,
    },
}

/// 状态转换后需要执行的副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Notify(Notice),
    Dispatch(Vec<Part>),
    PersistPart { part: Part, etag: String },
    Complete { upload_id: UploadId, parts: Vec<CompletedPart> },
    Abort { upload_id: UploadId },
    ReleaseTasks,
    DiscardRecord,
}

#[derive(Debug)]
struct PartSlot {
    part: Part,
    state: PartState,
    task: Option<TaskHandle>,
    etag: Option<String>,
    resumed: bool,
}

/// 会话状态机
///
/// 不执行任何 IO，只根据事件计算状态转换和需要执行的命令。
/// 所有事件都在会话自己的线程上串行处理。
#[derive(Debug)]
pub(crate) struct SessionMachine {
    session_key: SessionKey,
    state: SessionState,
    slots: Vec<PartSlot>,
    upload_id: Option<UploadId>,
    cancel_pending: bool,
    abort_pending: bool,
    error: Option<TransferError>,
    abort_error: Option<TransferError>,
    completed_parts: Vec<CompletedPart>,
}

impl SessionMachine {
    pub(crate) fn new(session_key: SessionKey, plan: &PartPlan) -> Self {
        Self {
            session_key,
            state: SessionState::Idle,
            slots: plan
                .iter()
                .map(|part| PartSlot {
                    part: *part,
                    state: PartState::Pending,
                    task: None,
                    etag: None,
                    resumed: false,
                })
                .collect(),
            upload_id: None,
            cancel_pending: false,
            abort_pending: false,
            error: None,
            abort_error: None,
            completed_parts: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn upload_id(&self) -> Option<&UploadId> {
        self.upload_id.as_ref()
    }

    pub(crate) fn part_state(&self, part_number: NonZeroUsize) -> Option<PartState> {
        self.slot(part_number).map(|slot| slot.state)
    }

    #[cfg(test)]
    pub(crate) fn part_task(&self, part_number: NonZeroUsize) -> Option<TaskHandle> {
        self.slot(part_number).and_then(|slot| slot.task)
    }

    /// 终止状态已经到达，且没有尚未返回的取消请求
    pub(crate) fn is_finished(&self) -> bool {
        self.state.is_terminal() && !self.abort_pending
    }

    /// 本次会话实际上传的字节数，不含断点恢复的分片
    pub(crate) fn uploaded_size(&self) -> u64 {
        self.slots
            .iter()
            .filter(|slot| slot.state == PartState::Completed && !slot.resumed)
            .map(|slot| slot.part.size().get())
            .sum()
    }

    pub(crate) fn start(&mut self) -> TransferResult<()> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }
        self.transition(SessionState::Creating);
        Ok(())
    }

    pub(crate) fn apply(&mut self, event: SessionEvent) -> TransferResult<Vec<Command>> {
        if self.state.is_terminal() || self.state == SessionState::Aborting {
            return Ok(self.apply_after_teardown(event));
        }
        match event {
            SessionEvent::Created { upload_id, resumed } => self.on_created(upload_id, resumed),
            SessionEvent::CreateFailed { error } => self.on_create_failed(error),
            SessionEvent::CancelRequested => Ok(self.on_cancel_requested()),
            SessionEvent::CompleteSucceeded => self.on_complete_succeeded(),
            SessionEvent::CompleteFailed { error } => {
                if self.state != SessionState::Completing {
                    return Err(self.invalid("complete failure"));
                }
                Ok(self.fail(error))
            }
            SessionEvent::AbortFinished { .. } => Err(self.invalid("abort result")),
            part_event => self.on_part_event(part_event),
        }
    }

    /// 将会话转换为失败状态
    ///
    /// 远端分片上传已经创建时，返回的命令中包含一次取消请求。
    pub(crate) fn fail(&mut self, error: TransferError) -> Vec<Command> {
        if self.state.is_terminal() {
            warn!(
                "{} already reached {:?}, drop error: {}",
                self.session_key, self.state, error
            );
            return Vec::new();
        }
        warn!("{} failed: {}", self.session_key, error);
        let was_aborting = self.state == SessionState::Aborting;
        self.error = Some(error);
        self.cancel_parts();
        self.transition(SessionState::Failed);

        let mut commands = vec![Command::ReleaseTasks];
        if !was_aborting {
            if let Some(upload_id) = self.upload_id.to_owned() {
                self.abort_pending = true;
                commands.push(Command::Abort { upload_id });
            }
        }
        commands
    }

    pub(crate) fn into_outcome(self) -> TransferResult<SessionOutcome> {
        if !self.is_finished() {
            return Err(self.invalid("outcome"));
        }
        let sunk_parts = self.collect_completed_parts();
        let outcome = match (self.state, self.upload_id) {
            (SessionState::Completed, Some(upload_id)) => SessionOutcome::Completed {
                upload_id,
                parts: self.completed_parts,
            },
            (SessionState::Aborted, Some(upload_id)) => SessionOutcome::Aborted {
                upload_id,
                abort_error: self.abort_error,
            },
            (SessionState::Failed, upload_id) => {
                let error = self.error.unwrap_or_else(|| {
                    TransferError::new_with_msg(TransferErrorKind::StateError, "session failed without error")
                });
                let remote = match (upload_id, self.abort_error) {
                    (None, _) => RemoteUploadState::NotCreated,
                    (Some(upload_id), None) => RemoteUploadState::Aborted { upload_id },
                    (Some(upload_id), Some(abort_error)) => RemoteUploadState::Orphaned {
                        upload_id,
                        abort_error,
                    },
                };
                SessionOutcome::Failed {
                    error,
                    remote,
                    sunk_parts,
                }
            }
            (state, _) => {
                return Err(TransferError::new_with_msg(
                    TransferErrorKind::StateError,
                    format!("session reached {:?} without upload id", state),
                ))
            }
        };
        Ok(outcome)
    }

    fn on_created(&mut self, upload_id: UploadId, resumed: Vec<CompletedPart>) -> TransferResult<Vec<Command>> {
        if self.state != SessionState::Creating {
            return Err(self.invalid("upload creation"));
        }
        self.upload_id = Some(upload_id.to_owned());
        self.transition(SessionState::Created);

        let mut resumed_parts = 0usize;
        for completed in resumed {
            match self.slot_mut(completed.part_number()) {
                Some(slot) if slot.state == PartState::Pending => {
                    slot.state = PartState::Completed;
                    slot.etag = Some(completed.etag().to_owned());
                    slot.resumed = true;
                    resumed_parts += 1;
                }
                _ => warn!(
                    "Ignore resumed part {} which is not in the plan",
                    completed.part_number()
                ),
            }
        }

        let mut commands = vec![Command::Notify(Notice::Created {
            upload_id,
            resumed_parts,
        })];
        if self.cancel_pending {
            commands.extend(self.begin_abort()?);
        } else if self.all_parts_completed() {
            commands.extend(self.begin_complete()?);
        } else {
            self.transition(SessionState::UploadingParts);
            let pending = self
                .slots
                .iter()
                .filter(|slot| slot.state == PartState::Pending)
                .map(|slot| slot.part)
                .collect();
            commands.push(Command::Dispatch(pending));
        }
        Ok(commands)
    }

    fn on_create_failed(&mut self, error: TransferError) -> TransferResult<Vec<Command>> {
        if self.state != SessionState::Creating {
            return Err(self.invalid("upload creation failure"));
        }
        Ok(self.fail(error))
    }

    fn on_cancel_requested(&mut self) -> Vec<Command> {
        match self.state {
            SessionState::Idle => self.fail(TransferError::new_with_msg(
                TransferErrorKind::UserCanceled,
                "session was cancelled before it started",
            )),
            SessionState::Creating => {
                debug!("{} will be aborted once the upload is created", self.session_key);
                self.cancel_pending = true;
                Vec::new()
            }
            SessionState::Created | SessionState::UploadingParts => match self.begin_abort() {
                Ok(commands) => commands,
                Err(err) => self.fail(err),
            },
            _ => {
                debug!("Ignore cancellation of {} in {:?}", self.session_key, self.state);
                Vec::new()
            }
        }
    }

    fn on_complete_succeeded(&mut self) -> TransferResult<Vec<Command>> {
        if self.state != SessionState::Completing {
            return Err(self.invalid("completion"));
        }
        self.transition(SessionState::Completed);
        Ok(vec![Command::ReleaseTasks, Command::DiscardRecord])
    }

    fn on_part_event(&mut self, event: SessionEvent) -> TransferResult<Vec<Command>> {
        match self.state {
            SessionState::UploadingParts => {}
            SessionState::Completing => {
                debug!("Ignore late {:?} of {} while completing", event, self.session_key);
                return Ok(Vec::new());
            }
            _ => return Err(self.invalid("part event")),
        }
        match event {
            SessionEvent::PartCarving { part_number } => {
                self.move_part(part_number, &[PartState::Pending], PartState::CarvingFile)?;
                Ok(Vec::new())
            }
            SessionEvent::PartStarted { part_number, task } => {
                self.move_part(part_number, &[PartState::CarvingFile], PartState::Started)?;
                if let Some(slot) = self.slot_mut(part_number) {
                    slot.task = Some(task);
                }
                Ok(vec![Command::Notify(Notice::PartStarted { part_number })])
            }
            SessionEvent::PartProgress { part_number, uploaded } => {
                if self.part_state(part_number) == Some(PartState::Completed) {
                    return Ok(Vec::new());
                }
                self.move_part(
                    part_number,
                    &[PartState::Started, PartState::InProgress],
                    PartState::InProgress,
                )?;
                Ok(vec![Command::Notify(Notice::PartProgress { part_number, uploaded })])
            }
            SessionEvent::PartCompleted { part_number, etag } => self.on_part_completed(part_number, etag),
            SessionEvent::PartFailed { part_number, error } => {
                if let Some(slot) = self.slot_mut(part_number) {
                    slot.state = PartState::Failed;
                }
                Ok(self.fail(error))
            }
            event => Err(TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!("{:?} is not a part event", event),
            )),
        }
    }

    fn on_part_completed(&mut self, part_number: NonZeroUsize, etag: String) -> TransferResult<Vec<Command>> {
        if self.part_state(part_number) == Some(PartState::Completed) {
            debug!(
                "Part {} of {} is already completed, ignore duplicate result",
                part_number, self.session_key
            );
            return Ok(Vec::new());
        }
        let part = self.move_part(
            part_number,
            &[PartState::Started, PartState::InProgress],
            PartState::Completed,
        )?;
        if let Some(slot) = self.slot_mut(part_number) {
            slot.etag = Some(etag.to_owned());
        }
        let mut commands = vec![
            Command::PersistPart {
                part,
                etag: etag.to_owned(),
            },
            Command::Notify(Notice::PartCompleted { part_number, etag }),
        ];
        if self.all_parts_completed() {
            commands.extend(self.begin_complete()?);
        }
        Ok(commands)
    }

    fn apply_after_teardown(&mut self, event: SessionEvent) -> Vec<Command> {
        match event {
            SessionEvent::AbortFinished { error } if self.abort_pending => {
                self.abort_pending = false;
                self.abort_error = error;
                if self.state == SessionState::Aborting {
                    self.transition(SessionState::Aborted);
                }
                vec![Command::DiscardRecord]
            }
            SessionEvent::PartCompleted { part_number, .. } | SessionEvent::PartFailed { part_number, .. } => {
                warn!(
                    "Discard late result of part {} for {} in {:?}",
                    part_number, self.session_key, self.state
                );
                Vec::new()
            }
            event => {
                debug!("Ignore {:?} of {} in {:?}", event, self.session_key, self.state);
                Vec::new()
            }
        }
    }

    fn begin_abort(&mut self) -> TransferResult<Vec<Command>> {
        let upload_id = self
            .upload_id
            .to_owned()
            .ok_or_else(|| self.invalid("abort without upload id"))?;
        self.cancel_parts();
        self.transition(SessionState::Aborting);
        self.abort_pending = true;
        Ok(vec![Command::ReleaseTasks, Command::Abort { upload_id }])
    }

    fn begin_complete(&mut self) -> TransferResult<Vec<Command>> {
        let upload_id = self
            .upload_id
            .to_owned()
            .ok_or_else(|| self.invalid("completion without upload id"))?;
        self.transition(SessionState::Completing);
        self.completed_parts = self.collect_completed_parts();
        Ok(vec![Command::Complete {
            upload_id,
            parts: self.completed_parts.to_owned(),
        }])
    }

    fn collect_completed_parts(&self) -> Vec<CompletedPart> {
        let mut parts: Vec<_> = self
            .slots
            .iter()
            .filter(|slot| slot.state == PartState::Completed)
            .filter_map(|slot| {
                slot.etag
                    .as_ref()
                    .map(|etag| CompletedPart::new(slot.part.part_number(), etag.to_owned()))
            })
            .collect();
        parts.sort_by_key(|part| part.part_number());
        parts
    }

    fn all_parts_completed(&self) -> bool {
        self.slots.iter().all(|slot| slot.state == PartState::Completed)
    }

    fn cancel_parts(&mut self) {
        for slot in self.slots.iter_mut().filter(|slot| !slot.state.is_terminal()) {
            slot.state = PartState::Cancelled;
        }
    }

    fn move_part(&mut self, part_number: NonZeroUsize, from: &[PartState], to: PartState) -> TransferResult<Part> {
        let session_key = self.session_key;
        let slot = self.slot_mut(part_number).ok_or_else(|| {
            TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!("part {} is not planned for {}", part_number, session_key),
            )
        })?;
        if !from.contains(&slot.state) {
            return Err(TransferError::new_with_msg(
                TransferErrorKind::StateError,
                format!(
                    "part {} of {} cannot move from {:?} to {:?}",
                    part_number, session_key, slot.state, to
                ),
            ));
        }
        debug!(
            "Part {} of {}: {:?} -> {:?}",
            part_number, session_key, slot.state, to
        );
        slot.state = to;
        Ok(slot.part)
    }

    fn transition(&mut self, next: SessionState) {
        debug!("{}: {:?} -> {:?}", self.session_key, self.state, next);
        self.state = next;
    }

    fn invalid(&self, operation: &str) -> TransferError {
        TransferError::new_with_msg(
            TransferErrorKind::StateError,
            format!("{} is not allowed for {} in {:?}", operation, self.session_key, self.state),
        )
    }

    fn slot(&self, part_number: NonZeroUsize) -> Option<&PartSlot> {
        self.slots.get(part_number.get() - 1)
    }

    fn slot_mut(&mut self, part_number: NonZeroUsize) -> Option<&mut PartSlot> {
        self.slots.get_mut(part_number.get() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::{super::super::PartPlanner, *};
    use anyhow::Result;

    const MIB: u64 = 1 << 20;

    fn n(part_number: usize) -> NonZeroUsize {
        NonZeroUsize::new(part_number).unwrap()
    }

    fn upload_id() -> UploadId {
        UploadId::new("fake-upload-id").unwrap()
    }

    fn new_machine(parts: u64) -> Result<SessionMachine> {
        let plan = PartPlanner::default().plan(parts * 5 * MIB, 5 * MIB)?;
        let mut machine = SessionMachine::new(SessionKey::generate(), &plan);
        machine.start()?;
        Ok(machine)
    }

    fn network_error() -> TransferError {
        TransferError::new_with_msg(TransferErrorKind::NetworkError, "connection reset")
    }

    fn started(machine: &mut SessionMachine, part_number: usize, task: u64) -> Result<()> {
        machine.apply(SessionEvent::PartCarving {
            part_number: n(part_number),
        })?;
        let task = TaskHandle::for_test(task);
        machine.apply(SessionEvent::PartStarted {
            part_number: n(part_number),
            task,
        })?;
        assert_eq!(machine.part_task(n(part_number)), Some(task));
        Ok(())
    }

    #[test]
    fn test_happy_path_completes_with_sorted_parts() -> Result<()> {
        let mut machine = new_machine(3)?;
        assert_eq!(machine.state(), SessionState::Creating);
        assert!(machine.start().is_err());

        let commands = machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![],
        })?;
        assert_eq!(machine.state(), SessionState::UploadingParts);
        assert!(matches!(&commands[1], Command::Dispatch(parts) if parts.len() == 3));

        for (part_number, task) in [(3, 30), (1, 10), (2, 20)] {
            started(&mut machine, part_number, task)?;
        }
        machine.apply(SessionEvent::PartProgress {
            part_number: n(2),
            uploaded: MIB,
        })?;
        assert_eq!(machine.part_state(n(2)), Some(PartState::InProgress));

        machine.apply(SessionEvent::PartCompleted {
            part_number: n(3),
            etag: "etag-3".to_owned(),
        })?;
        machine.apply(SessionEvent::PartCompleted {
            part_number: n(1),
            etag: "etag-1".to_owned(),
        })?;
        assert_eq!(machine.state(), SessionState::UploadingParts);
        let commands = machine.apply(SessionEvent::PartCompleted {
            part_number: n(2),
            etag: "etag-2".to_owned(),
        })?;
        assert_eq!(machine.state(), SessionState::Completing);
        let expected = vec![
            CompletedPart::new(n(1), "etag-1"),
            CompletedPart::new(n(2), "etag-2"),
            CompletedPart::new(n(3), "etag-3"),
        ];
        assert_eq!(
            commands.last(),
            Some(&Command::Complete {
                upload_id: upload_id(),
                parts: expected.to_owned(),
            })
        );

        // duplicate success for a completed part is a no-op
        assert!(machine
            .apply(SessionEvent::PartCompleted {
                part_number: n(2),
                etag: "etag-2".to_owned(),
            })?
            .is_empty());

        machine.apply(SessionEvent::CompleteSucceeded)?;
        assert!(machine.is_finished());
        assert_eq!(machine.uploaded_size(), 15 * MIB);
        match machine.into_outcome()? {
            SessionOutcome::Completed { upload_id: id, parts } => {
                assert_eq!(id, upload_id());
                assert_eq!(parts, expected);
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        Ok(())
    }

    #[test]
    fn test_create_failure_issues_no_abort() -> Result<()> {
        let mut machine = new_machine(2)?;
        let commands = machine.apply(SessionEvent::CreateFailed { error: network_error() })?;
        assert_eq!(commands, vec![Command::ReleaseTasks]);
        assert_eq!(machine.state(), SessionState::Failed);
        assert!(machine.is_finished());
        match machine.into_outcome()? {
            SessionOutcome::Failed { error, remote, .. } => {
                assert_eq!(error.kind(), TransferErrorKind::NetworkError);
                assert!(matches!(remote, RemoteUploadState::NotCreated));
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        Ok(())
    }

    #[test]
    fn test_part_failure_aborts_with_upload_id() -> Result<()> {
        let mut machine = new_machine(3)?;
        machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![],
        })?;
        started(&mut machine, 1, 1)?;
        machine.apply(SessionEvent::PartCompleted {
            part_number: n(1),
            etag: "etag-1".to_owned(),
        })?;
        machine.apply(SessionEvent::PartCarving { part_number: n(2) })?;
        let commands = machine.apply(SessionEvent::PartFailed {
            part_number: n(2),
            error: TransferError::new_with_msg(TransferErrorKind::FileSystemError, "disk full"),
        })?;
        assert_eq!(
            commands,
            vec![Command::ReleaseTasks, Command::Abort { upload_id: upload_id() }]
        );
        assert_eq!(machine.state(), SessionState::Failed);
        assert_eq!(machine.part_state(n(2)), Some(PartState::Failed));
        assert_eq!(machine.part_state(n(3)), Some(PartState::Cancelled));
        assert!(!machine.is_finished());

        // late results are discarded and never re-enter the state machine
        assert!(machine
            .apply(SessionEvent::PartCompleted {
                part_number: n(3),
                etag: "etag-3".to_owned(),
            })?
            .is_empty());
        assert!(machine.apply(SessionEvent::CancelRequested)?.is_empty());

        assert_eq!(
            machine.apply(SessionEvent::AbortFinished { error: None })?,
            vec![Command::DiscardRecord]
        );
        assert!(machine.is_finished());
        assert_eq!(machine.state(), SessionState::Failed);
        match machine.into_outcome()? {
            SessionOutcome::Failed {
                error,
                remote,
                sunk_parts,
            } => {
                assert_eq!(error.kind(), TransferErrorKind::FileSystemError);
                assert!(matches!(remote, RemoteUploadState::Aborted { upload_id: id } if id == upload_id()));
                assert_eq!(sunk_parts, vec![CompletedPart::new(n(1), "etag-1")]);
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        Ok(())
    }

    #[test]
    fn test_cancel_while_uploading_aborts() -> Result<()> {
        let mut machine = new_machine(2)?;
        machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![],
        })?;
        started(&mut machine, 1, 1)?;
        let commands = machine.apply(SessionEvent::CancelRequested)?;
        assert_eq!(
            commands,
            vec![Command::ReleaseTasks, Command::Abort { upload_id: upload_id() }]
        );
        assert_eq!(machine.state(), SessionState::Aborting);
        assert!(machine.apply(SessionEvent::CancelRequested)?.is_empty());

        machine.apply(SessionEvent::AbortFinished {
            error: Some(network_error()),
        })?;
        assert_eq!(machine.state(), SessionState::Aborted);
        match machine.into_outcome()? {
            SessionOutcome::Aborted { upload_id: id, abort_error } => {
                assert_eq!(id, upload_id());
                assert!(abort_error.is_some());
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        Ok(())
    }

    #[test]
    fn test_cancel_before_creation() -> Result<()> {
        let plan = PartPlanner::default().plan(5 * MIB, 5 * MIB)?;
        let mut machine = SessionMachine::new(SessionKey::generate(), &plan);
        machine.apply(SessionEvent::CancelRequested)?;
        assert_eq!(machine.state(), SessionState::Failed);
        match machine.into_outcome()? {
            SessionOutcome::Failed { error, remote, .. } => {
                assert_eq!(error.kind(), TransferErrorKind::UserCanceled);
                assert!(matches!(remote, RemoteUploadState::NotCreated));
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }

        let mut machine = new_machine(2)?;
        assert!(machine.apply(SessionEvent::CancelRequested)?.is_empty());
        let commands = machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![],
        })?;
        assert!(!commands.iter().any(|command| matches!(command, Command::Dispatch(_))));
        assert!(commands.contains(&Command::Abort { upload_id: upload_id() }));
        assert_eq!(machine.state(), SessionState::Aborting);
        Ok(())
    }

    #[test]
    fn test_complete_failure_aborts() -> Result<()> {
        let mut machine = new_machine(1)?;
        machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![],
        })?;
        started(&mut machine, 1, 1)?;
        machine.apply(SessionEvent::PartCompleted {
            part_number: n(1),
            etag: "etag-1".to_owned(),
        })?;
        assert!(machine.apply(SessionEvent::CancelRequested)?.is_empty());
        assert_eq!(machine.state(), SessionState::Completing);

        let commands = machine.apply(SessionEvent::CompleteFailed { error: network_error() })?;
        assert!(commands.contains(&Command::Abort { upload_id: upload_id() }));
        machine.apply(SessionEvent::AbortFinished {
            error: Some(network_error()),
        })?;
        match machine.into_outcome()? {
            SessionOutcome::Failed { remote, .. } => {
                assert!(matches!(remote, RemoteUploadState::Orphaned { .. }));
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        Ok(())
    }

    #[test]
    fn test_resumed_parts_are_not_dispatched() -> Result<()> {
        let mut machine = new_machine(3)?;
        let commands = machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![CompletedPart::new(n(2), "etag-2")],
        })?;
        assert_eq!(
            commands[0],
            Command::Notify(Notice::Created {
                upload_id: upload_id(),
                resumed_parts: 1,
            })
        );
        match &commands[1] {
            Command::Dispatch(parts) => {
                assert_eq!(
                    parts.iter().map(|part| part.part_number()).collect::<Vec<_>>(),
                    vec![n(1), n(3)]
                );
            }
            command => panic!("unexpected command {:?}", command),
        }

        let mut machine = new_machine(2)?;
        let commands = machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![CompletedPart::new(n(2), "etag-2"), CompletedPart::new(n(1), "etag-1")],
        })?;
        assert_eq!(machine.state(), SessionState::Completing);
        assert!(matches!(commands.last(), Some(Command::Complete { parts, .. }) if parts[0].part_number() == n(1)));
        assert_eq!(machine.uploaded_size(), 0);
        Ok(())
    }

    #[test]
    fn test_invalid_transitions_are_state_errors() -> Result<()> {
        let mut machine = new_machine(2)?;
        let err = machine
            .apply(SessionEvent::PartCarving { part_number: n(1) })
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::StateError);
        assert_eq!(
            machine.apply(SessionEvent::CompleteSucceeded).unwrap_err().kind(),
            TransferErrorKind::StateError
        );

        machine.apply(SessionEvent::Created {
            upload_id: upload_id(),
            resumed: vec![],
        })?;
        let err = machine
            .apply(SessionEvent::PartCompleted {
                part_number: n(1),
                etag: "etag-1".to_owned(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::StateError);
        let err = machine
            .apply(SessionEvent::PartCarving { part_number: n(9) })
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::StateError);

        let commands = machine.fail(err);
        assert!(commands.contains(&Command::Abort { upload_id: upload_id() }));
        assert!(machine.fail(network_error()).is_empty());
        Ok(())
    }
}
