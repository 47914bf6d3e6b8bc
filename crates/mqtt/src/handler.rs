//! Inbound message dispatch.
//!
//! The connection kernel converts every received PUBLISH into an
//! [`IncomingMessage`] and hands it to the registered [`MessageHandler`]
//! before polling the event loop again, so handlers observe messages in
//! arrival order. Handlers run on the kernel task and must not block for
//! long.

use std::error::Error;

use bytes::Bytes;
use rumqttc::{Publish, QoS};

/// Boxed error returned by handlers; the kernel only needs its message.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// A PUBLISH received from the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl IncomingMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        IncomingMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

impl From<&Publish> for IncomingMessage {
    fn from(publish: &Publish) -> Self {
        IncomingMessage {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

/// Receives every inbound message.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: &IncomingMessage) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&IncomingMessage) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_message(&self, message: &IncomingMessage) -> Result<(), HandlerError> {
        self(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_from_publish_copies_fields() {
        let mut publish = Publish::new("/devices/dev-1/config", QoS::AtLeastOnce, "cfg");
        publish.retain = true;

        let message = IncomingMessage::from(&publish);
        assert_eq!(message.topic, "/devices/dev-1/config");
        assert_eq!(message.payload, Bytes::from_static(b"cfg"));
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(message.retain);
    }

    #[test]
    fn test_closure_handler() {
        let seen = Mutex::new(Vec::new());
        let handler = |msg: &IncomingMessage| -> Result<(), HandlerError> {
            seen.lock().unwrap().push(msg.topic.clone());
            Ok(())
        };

        handler.on_message(&IncomingMessage::new("a", "1")).unwrap();
        handler.on_message(&IncomingMessage::new("b", "2")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }
}
