//! Internal logging/telemetry bus, independent of any one Controller.
//!
//! Distinct from [`crate::event::ControllerEvent`]: messages are free-text,
//! level-filtered diagnostics meant for an operator console; events are
//! structured, port-scoped state notifications meant for client sessions.

use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageLevel {
    Verbose = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl std::fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verbose => write!(f, "VERB"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERR!"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub timestamp: String,
    pub level: MessageLevel,
    pub source: String,
    pub text: String,
}

impl Message {
    pub fn new(level: MessageLevel, source: impl Into<String>, text: impl Into<String>) -> Self {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        Self {
            timestamp,
            level,
            source: source.into(),
            text: text.into(),
        }
    }

    pub fn info(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Info, source, text)
    }

    pub fn warning(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Warning, source, text)
    }

    pub fn error(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Error, source, text)
    }

    pub fn verbose(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Verbose, source, text)
    }

    pub fn format_console(&self) -> String {
        format!(
            "[{}] {} | {}: {}",
            self.timestamp, self.level, self.source, self.text
        )
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_console())
    }
}

/// Broadcasts [`Message`]s to any number of subscribers (REST log tail,
/// operator console), filtering by a runtime-adjustable minimum level.
pub struct MessageDispatcher {
    tx: broadcast::Sender<Message>,
    min_level: Arc<parking_lot::RwLock<MessageLevel>>,
}

impl MessageDispatcher {
    pub fn new(buffer_size: usize, min_level: MessageLevel) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self {
            tx,
            min_level: Arc::new(parking_lot::RwLock::new(min_level)),
        }
    }

    pub fn default_with_buffer() -> Self {
        Self::new(100, MessageLevel::Info)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }

    pub fn publish(&self, message: Message) -> Result<usize, broadcast::error::SendError<Message>> {
        let min_level = *self.min_level.read();
        if message.level >= min_level {
            match message.level {
                MessageLevel::Verbose | MessageLevel::Info => {}
                MessageLevel::Warning => tracing::warn!("{}", message.format_console()),
                MessageLevel::Error => tracing::error!("{}", message.format_console()),
            }
            self.tx.send(message)
        } else {
            Ok(0)
        }
    }

    pub fn set_min_level(&self, level: MessageLevel) {
        *self.min_level.write() = level;
    }

    pub fn get_min_level(&self) -> MessageLevel {
        *self.min_level.read()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn info(
        &self,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<usize, broadcast::error::SendError<Message>> {
        self.publish(Message::info(source, text))
    }

    pub fn warning(
        &self,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<usize, broadcast::error::SendError<Message>> {
        self.publish(Message::warning(source, text))
    }

    pub fn error(
        &self,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<usize, broadcast::error::SendError<Message>> {
        self.publish(Message::error(source, text))
    }

    pub fn verbose(
        &self,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<usize, broadcast::error::SendError<Message>> {
        self.publish(Message::verbose(source, text))
    }
}

impl Clone for MessageDispatcher {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            min_level: Arc::clone(&self.min_level),
        }
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_below_min_level_are_dropped() {
        let dispatcher = MessageDispatcher::new(10, MessageLevel::Warning);
        let mut rx = dispatcher.subscribe();
        dispatcher.info("test", "should be filtered").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn warning_and_above_reach_subscribers() {
        let dispatcher = MessageDispatcher::new(10, MessageLevel::Warning);
        let mut rx = dispatcher.subscribe();
        dispatcher.error("test", "boom").unwrap();
        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.text, "boom");
    }
}
