//! 作业状态机

use std::fmt;

use crate::core::error::{CoreResult, QueryError};

/// 进度回调：`(百分比 0-100, 说明)`
pub type ProgressCallback = dyn Fn(u8, &str) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Received,
    CacheCheck,
    Validating,
    Optimizing,
    ParallelDecision,
    ParallelExecute,
    SequentialExecute,
    CachePopulate,
    Done,
    Failed,
}

impl JobState {
    pub fn progress(&self) -> u8 {
        match self {
            JobState::Received => 0,
            JobState::CacheCheck => 5,
            JobState::Validating => 15,
            JobState::Optimizing => 25,
            JobState::ParallelDecision => 35,
            JobState::ParallelExecute | JobState::SequentialExecute => 50,
            JobState::CachePopulate => 90,
            JobState::Done | JobState::Failed => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Received, CacheCheck)
                | (CacheCheck, Done)
                | (CacheCheck, Validating)
                | (Validating, Optimizing)
                | (Optimizing, ParallelDecision)
                | (ParallelDecision, ParallelExecute)
                | (ParallelDecision, SequentialExecute)
                | (ParallelExecute, CachePopulate)
                | (ParallelExecute, SequentialExecute)
                | (SequentialExecute, CachePopulate)
                | (CachePopulate, Done)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 跟踪单个作业的状态并上报进度
pub struct JobTracker<'a> {
    job_id: String,
    state: JobState,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> JobTracker<'a> {
    pub fn new(job_id: impl Into<String>, progress: Option<&'a ProgressCallback>) -> Self {
        let tracker = Self {
            job_id: job_id.into(),
            state: JobState::Received,
            progress,
        };
        tracker.report("已接收");
        tracker
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState, message: &str) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(QueryError::Internal(format!(
                "作业 {} 非法状态转换: {} -> {}",
                self.job_id, self.state, next
            )));
        }
        log::debug!("作业 {} 状态: {} -> {}", self.job_id, self.state, next);
        self.state = next;
        self.report(message);
        Ok(())
    }

    /// 进入失败状态；已处于终止状态时忽略
    pub fn fail(&mut self, error: &QueryError) {
        if self.state.is_terminal() {
            return;
        }
        log::debug!("作业 {} 状态: {} -> {}", self.job_id, self.state, JobState::Failed);
        self.state = JobState::Failed;
        self.report(&format!("失败: {}", error));
    }

    fn report(&self, message: &str) {
        if let Some(callback) = self.progress {
            callback(self.state.progress(), message);
        }
    }
}

impl fmt::Debug for JobTracker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTracker")
            .field("job_id", &self.job_id)
            .field("state", &self.state)
            .finish()
    }
}
