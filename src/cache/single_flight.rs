//! 同键请求合并
//!
//! 同一进程内每个键同时最多只有一次计算在进行，其余并发请求等待并共享它的结果（包括错误）。

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::core::error::CoreResult;

/// 调用方在一次合并中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// 实际执行了计算
    Leader,
    /// 等待并复用了其他调用方的结果
    Follower,
}

type Slot<T> = Arc<OnceCell<CoreResult<T>>>;

pub struct SingleFlight<T> {
    calls: DashMap<String, Slot<T>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// 以 `key` 为粒度执行 `compute`
    ///
    /// 领头的调用被取消时，等待中的调用方会接手计算
    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> (CoreResult<T>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let slot = self
            .calls
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut led = false;
        let result = slot
            .get_or_init(|| {
                led = true;
                compute()
            })
            .await
            .clone();

        if led {
            self.calls.remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
            (result, FlightRole::Leader)
        } else {
            (result, FlightRole::Follower)
        }
    }

    /// 正在进行中的键数量
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.len())
            .finish()
    }
}
