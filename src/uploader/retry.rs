// 自动重试策略
//
// - 每个文件独立计数，达到 max_auto_attempts 后不再自动重试
// - 响应中带有 prevent_retry_response_property 时，自动与手动重试都被禁止
// - 重试通过定时器触发，定时器到期后向引擎发送 AutoRetry 消息

use super::handler::EngineMessage;
use super::response::UploadResponse;
use super::task::FileId;
use crate::config::RetryConfig;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// 自动重试状态
#[derive(Debug, Default)]
pub struct AutoRetryState {
    attempts: HashMap<FileId, u32>,
    prevented: HashSet<FileId>,
    timers: HashMap<FileId, JoinHandle<()>>,
}

impl AutoRetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录服务器是否禁止重试（以最近一次响应为准）
    pub fn record_response(&mut self, id: FileId, response: &UploadResponse, config: &RetryConfig) {
        if response.flag(&config.prevent_retry_response_property) {
            debug!("服务器禁止重试: id={}", id);
            self.prevented.insert(id);
        } else {
            self.prevented.remove(&id);
        }
    }

    pub fn is_prevented(&self, id: FileId) -> bool {
        self.prevented.contains(&id)
    }

    /// 是否应当自动重试
    pub fn should_auto_retry(&self, id: FileId, config: &RetryConfig) -> bool {
        config.enable_auto && !self.is_prevented(id) && self.attempts(id) < config.max_auto_attempts
    }

    /// 已执行的自动重试次数
    pub fn attempts(&self, id: FileId) -> u32 {
        self.attempts.get(&id).copied().unwrap_or(0)
    }

    /// 手动重试后不再自动重试
    pub fn exhaust(&mut self, id: FileId, config: &RetryConfig) {
        self.attempts.insert(id, config.max_auto_attempts);
    }

    /// 安排一次自动重试，返回本次重试的序号
    pub fn schedule(
        &mut self,
        id: FileId,
        delay: Duration,
        tx: mpsc::UnboundedSender<EngineMessage>,
    ) -> u32 {
        self.cancel(id);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineMessage::AutoRetry { id });
        });
        self.timers.insert(id, handle);
        self.attempts(id) + 1
    }

    /// 定时器到期，计入一次重试
    ///
    /// 返回 false 表示定时器已被取消，消息应当忽略
    pub fn fire(&mut self, id: FileId) -> bool {
        if self.timers.remove(&id).is_none() {
            return false;
        }
        *self.attempts.entry(id).or_insert(0) += 1;
        true
    }

    /// 取消尚未到期的定时器
    pub fn cancel(&mut self, id: FileId) -> bool {
        match self.timers.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// 清除文件的全部重试状态
    pub fn forget(&mut self, id: FileId) {
        self.cancel(id);
        self.attempts.remove(&id);
        self.prevented.remove(&id);
    }

    pub fn has_pending(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn is_pending(&self, id: FileId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn clear(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        self.attempts.clear();
        self.prevented.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enable_auto: bool, max: u32) -> RetryConfig {
        RetryConfig {
            enable_auto,
            max_auto_attempts: max,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_attempt_limit() {
        let config = config(true, 2);
        let mut state = AutoRetryState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = FileId(1);

        for expected in 1..=2 {
            assert!(state.should_auto_retry(id, &config));
            assert_eq!(state.schedule(id, Duration::ZERO, tx.clone()), expected);
            assert!(state.has_pending());

            match rx.recv().await.unwrap() {
                EngineMessage::AutoRetry { id: fired } => assert_eq!(fired, id),
                other => panic!("unexpected message: {:?}", other),
            }
            assert!(state.fire(id));
        }

        assert_eq!(state.attempts(id), 2);
        assert!(!state.should_auto_retry(id, &config));
        assert!(!state.has_pending());
    }

    #[test]
    fn test_disabled_never_retries() {
        let state = AutoRetryState::new();
        assert!(!state.should_auto_retry(FileId(1), &config(false, 3)));
    }

    #[test]
    fn test_prevent_retry_property() {
        let config = config(true, 3);
        let mut state = AutoRetryState::new();
        let id = FileId(1);

        state.record_response(id, &UploadResponse::parse(r#"{"preventRetry":true}"#), &config);
        assert!(state.is_prevented(id));
        assert!(!state.should_auto_retry(id, &config));

        state.record_response(id, &UploadResponse::parse(r#"{"success":false}"#), &config);
        assert!(!state.is_prevented(id));
    }

    #[tokio::test]
    async fn test_cancelled_timer_is_ignored() {
        let mut state = AutoRetryState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = FileId(1);

        state.schedule(id, Duration::from_secs(60), tx);
        assert!(state.cancel(id));
        assert!(!state.fire(id));
        assert_eq!(state.attempts(id), 0);
    }

    #[test]
    fn test_manual_retry_exhausts_auto_attempts() {
        let config = config(true, 3);
        let mut state = AutoRetryState::new();
        state.exhaust(FileId(1), &config);
        assert!(!state.should_auto_retry(FileId(1), &config));
    }
}
