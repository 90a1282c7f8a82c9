//! 事件记录器：先广播，再追加到存储
//!
//! 追加失败不会中断对话，只记一条 warn。

use std::sync::Arc;

use crate::session::{EventHub, SessionEvent, SessionStorage};

#[derive(Clone)]
pub struct EventLogger {
    storage: Arc<dyn SessionStorage>,
    hub: Arc<EventHub>,
}

impl EventLogger {
    pub fn new(storage: Arc<dyn SessionStorage>, hub: Arc<EventHub>) -> Self {
        Self { storage, hub }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub async fn log(&self, session_id: &str, event: SessionEvent) {
        self.hub.emit(session_id, &event);
        if let Err(e) = self.storage.append(session_id, &event).await {
            tracing::warn!(
                session = %session_id,
                event = %event.kind(),
                error = %e,
                "failed to append session event"
            );
        }
    }
}
