//! Topic-keyed dispatch of inbound messages

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::warn;

use crate::error::LinkResult;
use crate::types::NodeId;

/// Boxed async handler for one topic
type TopicHandler = Arc<dyn Fn(Bytes, NodeId) -> BoxFuture<'static, LinkResult<()>> + Send + Sync>;

/// Dispatches each inbound message to the handler registered for its topic
///
/// Handlers are wired up once at service construction. Failure domains are
/// isolated: a handler returning an error is logged and contained, never
/// propagated, so one bad message cannot stall delivery of the rest.
/// Messages on unregistered topics are logged and dropped.
#[derive(Default)]
pub struct MessageRouter {
    handlers: HashMap<String, TopicHandler>,
}

impl MessageRouter {
    /// Create a router with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a topic, replacing any previous one
    pub fn register<F, Fut>(&mut self, topic: &str, handler: F)
    where
        F: Fn(Bytes, NodeId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LinkResult<()>> + Send + 'static,
    {
        let handler: TopicHandler = Arc::new(move |payload, from| Box::pin(handler(payload, from)));
        self.handlers.insert(topic.to_string(), handler);
    }

    /// Dispatch one message to its topic handler
    pub async fn dispatch(&self, topic: &str, payload: Bytes, from: NodeId) {
        let Some(handler) = self.handlers.get(topic) else {
            warn!(topic, %from, "dropping message for unknown topic");
            return;
        };
        if let Err(e) = handler(payload, from.clone()).await {
            warn!(topic, %from, error = %e, "topic handler failed");
        }
    }

    /// Topics with a registered handler
    pub fn topics(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("topics", &self.topics())
            .finish()
    }
}
