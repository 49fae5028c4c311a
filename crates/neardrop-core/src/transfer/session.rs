//! 活动会话槽位
//!
//! 每个方向（发送/接收）一个槽位，保存当前会话的 ID 和取消令牌。
//! 取消请求只触发令牌，资源由持有会话的任务在下一个检查点自行清理。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    token: CancellationToken,
}

/// 会话槽位
#[derive(Debug, Default)]
pub struct SessionSlot {
    active: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl SessionSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // 锁内不会 panic，中毒时直接沿用内部数据
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记新会话，覆盖旧的登记
    ///
    /// 旧会话不会被取消，也不会在结束时清掉新会话的登记。
    pub fn install(self: &Arc<Self>) -> SessionGuard {
        let guard = self.new_guard();
        *self.lock() = Some(ActiveSession {
            id: guard.id,
            token: guard.token.clone(),
        });
        guard
    }

    /// 槽位空闲时登记新会话，否则返回 `None`
    pub fn try_claim(self: &Arc<Self>) -> Option<SessionGuard> {
        let mut active = self.lock();
        if active.is_some() {
            return None;
        }
        let guard = self.new_guard();
        *active = Some(ActiveSession {
            id: guard.id,
            token: guard.token.clone(),
        });
        Some(guard)
    }

    /// 请求取消当前会话，返回是否存在活动会话
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(session) => {
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn new_guard(self: &Arc<Self>) -> SessionGuard {
        SessionGuard {
            slot: Arc::clone(self),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    fn release(&self, id: u64) {
        let mut active = self.lock();
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
        }
    }
}

/// 会话登记凭证，drop 时释放槽位
#[derive(Debug)]
pub struct SessionGuard {
    slot: Arc<SessionSlot>,
    id: u64,
    token: CancellationToken,
}

impl SessionGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}
