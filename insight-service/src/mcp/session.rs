//! Per-client state.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

const RESOURCE_UPDATED: &str = "notifications/resources/updated";

/// One connected client: the stdio process peer, or one SSE session.
#[derive(Debug)]
pub struct Peer {
    id: String,
    subscriptions: Mutex<HashSet<String>>,
}

impl Peer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self, uri: &str) {
        if self.subscriptions().insert(uri.to_string()) {
            tracing::debug!(peer = %self.id, uri = %uri, "已订阅资源");
        }
    }

    pub fn unsubscribe(&self, uri: &str) {
        if self.subscriptions().remove(uri) {
            tracing::debug!(peer = %self.id, uri = %uri, "已取消订阅资源");
        }
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions().contains(uri)
    }

    /// Resource updates reach only peers subscribed to that URI; other
    /// notifications always pass.
    pub fn wants(&self, notification: &Value) -> bool {
        if notification["method"] != RESOURCE_UPDATED {
            return true;
        }
        notification["params"]["uri"]
            .as_str()
            .is_some_and(|uri| self.is_subscribed(uri))
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashSet<String>> {
        self.subscriptions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::notification;
    use serde_json::json;

    #[test]
    fn test_resource_updates_follow_subscriptions() {
        let peer = Peer::new("s1");
        let update = notification(RESOURCE_UPDATED, json!({ "uri": "memo://business_insights" }));

        assert!(!peer.wants(&update));
        peer.subscribe("memo://business_insights");
        assert!(peer.wants(&update));
        peer.unsubscribe("memo://business_insights");
        assert!(!peer.wants(&update));
    }

    #[test]
    fn test_other_notifications_always_pass() {
        let peer = Peer::new("s1");
        assert!(peer.wants(&notification("notifications/tools/list_changed", json!({}))));
    }
}
