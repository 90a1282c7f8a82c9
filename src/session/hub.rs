//! 事件广播
//!
//! 每条写入日志的事件同时广播给订阅者：按分类订阅，或订阅全部（通配）。
//! 每个分类一个预先建好的 broadcast 通道，发送与订阅都不加锁；慢订阅者只会丢消息（Lagged），
//! 不会阻塞发送方。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::session::{EventCategory, SessionEvent};

const CHANNEL_CAPACITY: usize = 256;

/// 广播出去的事件（带所属会话）
#[derive(Clone, Debug)]
pub struct HubEvent {
    pub session_id: String,
    pub event: SessionEvent,
}

pub struct EventHub {
    all: broadcast::Sender<Arc<HubEvent>>,
    by_category: HashMap<EventCategory, broadcast::Sender<Arc<HubEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY);
        let by_category = EventCategory::ALL
            .iter()
            .map(|c| (*c, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();
        Self { all, by_category }
    }

    /// 订阅全部事件；drop Receiver 即取消订阅
    pub fn subscribe_all(&self) -> broadcast::Receiver<Arc<HubEvent>> {
        self.all.subscribe()
    }

    pub fn subscribe(&self, category: EventCategory) -> broadcast::Receiver<Arc<HubEvent>> {
        match self.by_category.get(&category) {
            Some(tx) => tx.subscribe(),
            // ALL 覆盖全部分类，不会走到这里
            None => self.all.subscribe(),
        }
    }

    /// 广播；没有订阅者时直接丢弃
    pub fn emit(&self, session_id: &str, event: &SessionEvent) {
        let category = event.payload.category();
        let has_category_subscribers = self
            .by_category
            .get(&category)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false);
        if !has_category_subscribers && self.all.receiver_count() == 0 {
            return;
        }

        let item = Arc::new(HubEvent {
            session_id: session_id.to_string(),
            event: event.clone(),
        });
        if let Some(tx) = self.by_category.get(&category) {
            let _ = tx.send(Arc::clone(&item));
        }
        let _ = self.all.send(item);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
