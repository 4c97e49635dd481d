// 有界并发请求队列
//
// 队列前 max_connections 个条目为活跃请求，其余条目排队等待
// 条目完成后从队列移除，若被移除的条目位于活跃窗口内且剩余长度仍达到上限，
// 则提升位于 max_connections - 1 位置的条目（即窗口外第一个等待者）

use std::fmt::Debug;
use tracing::debug;

/// 有界并发请求队列
///
/// 只负责槽位记账，不发起任何网络请求
#[derive(Debug, Clone)]
pub struct RequestQueue<K> {
    entries: Vec<K>,
    max_connections: usize,
}

impl<K> RequestQueue<K>
where
    K: Copy + PartialEq + Debug,
{
    /// 创建队列，并发上限至少为 1
    pub fn new(max_connections: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_connections: max_connections.max(1),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// 入队
    ///
    /// 返回 true 表示当前有空闲槽位，调用方应立即发送
    pub fn push(&mut self, id: K) -> bool {
        self.entries.push(id);
        let dispatch = self.entries.len() <= self.max_connections;
        debug!(
            "请求入队: id={:?}, 队列长度={}, 立即发送={}",
            id,
            self.entries.len(),
            dispatch
        );
        dispatch
    }

    /// 出队
    ///
    /// 返回新进入活跃窗口、需要立即发送的条目
    pub fn dequeue(&mut self, id: K) -> Option<K> {
        let index = self.position(id)?;
        self.entries.remove(index);

        let max = self.max_connections;
        if self.entries.len() >= max && index < max {
            let next = self.entries[max - 1];
            debug!("请求出队: id={:?}, 提升等待请求 {:?}", id, next);
            Some(next)
        } else {
            debug!("请求出队: id={:?}", id);
            None
        }
    }

    pub fn position(&self, id: K) -> Option<usize> {
        self.entries.iter().position(|entry| *entry == id)
    }

    pub fn contains(&self, id: K) -> bool {
        self.position(id).is_some()
    }

    /// 是否处于活跃窗口内
    pub fn is_active(&self, id: K) -> bool {
        matches!(self.position(id), Some(index) if index < self.max_connections)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 活跃请求数
    pub fn active_count(&self) -> usize {
        self.entries.len().min(self.max_connections)
    }

    /// 等待中的请求数
    pub fn waiting_count(&self) -> usize {
        self.entries.len().saturating_sub(self.max_connections)
    }

    /// 当前活跃窗口内的条目
    pub fn active_ids(&self) -> Vec<K> {
        self.entries
            .iter()
            .take(self.max_connections)
            .copied()
            .collect()
    }

    /// 全部条目（活跃在前）
    pub fn snapshot(&self) -> Vec<K> {
        self.entries.clone()
    }

    /// 清空队列，返回清空前的条目
    pub fn drain(&mut self) -> Vec<K> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dispatch_within_limit() {
        let mut queue = RequestQueue::new(3);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert!(!queue.push(4));

        assert_eq!(queue.active_count(), 3);
        assert_eq!(queue.waiting_count(), 1);
        assert!(queue.is_active(3));
        assert!(!queue.is_active(4));
    }

    #[test]
    fn test_completion_promotes_next_waiter() {
        let mut queue = RequestQueue::new(2);
        for id in 1..=4 {
            queue.push(id);
        }

        assert_eq!(queue.dequeue(2), Some(3));
        assert!(queue.is_active(3));
        assert_eq!(queue.dequeue(1), Some(4));
        assert_eq!(queue.dequeue(3), None);
        assert_eq!(queue.dequeue(4), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_removing_waiter_promotes_nothing() {
        let mut queue = RequestQueue::new(1);
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.dequeue(3), None);
        assert_eq!(queue.snapshot(), vec![1, 2]);
        assert_eq!(queue.dequeue(1), Some(2));
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let mut queue: RequestQueue<u32> = RequestQueue::new(2);
        queue.push(1);
        assert_eq!(queue.dequeue(9), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let mut queue = RequestQueue::new(0);
        assert_eq!(queue.max_connections(), 1);
        assert!(queue.push(1));
        assert!(!queue.push(2));
    }

    proptest! {
        /// 任意完成顺序下，活跃请求数都不超过上限，且每个请求最终都会被发送
        #[test]
        fn prop_active_never_exceeds_limit(
            max in 1usize..5,
            count in 0u32..20,
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 0..40),
        ) {
            let mut queue = RequestQueue::new(max);
            let mut in_flight: Vec<u32> = Vec::new();
            let mut dispatched = 0u32;

            for id in 0..count {
                if queue.push(id) {
                    in_flight.push(id);
                    dispatched += 1;
                }
                prop_assert!(in_flight.len() <= max);
            }

            let mut picks = picks.into_iter();
            while !in_flight.is_empty() {
                let index = picks
                    .next()
                    .map(|p| p.index(in_flight.len()))
                    .unwrap_or(0);
                let done = in_flight.remove(index);
                if let Some(next) = queue.dequeue(done) {
                    prop_assert!(!in_flight.contains(&next));
                    in_flight.push(next);
                    dispatched += 1;
                }
                prop_assert!(in_flight.len() <= max);
                prop_assert_eq!(in_flight.len(), queue.active_count());
            }

            prop_assert_eq!(dispatched, count);
            prop_assert!(queue.is_empty());
        }
    }
}
