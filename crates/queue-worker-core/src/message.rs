use std::fmt;

/// Broker-side identifier of one delivery.
pub type DeliveryTag = u64;

/// One broker-delivered unit.
///
/// The broker keeps ownership of the underlying delivery until it is
/// acknowledged; this is a handle carrying the payload and the tag needed to
/// acknowledge it. A worker holds at most one unacknowledged message at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: String,
    delivery_tag: DeliveryTag,
}

impl Message {
    pub fn new(payload: impl Into<String>, delivery_tag: DeliveryTag) -> Self {
        Message {
            payload: payload.into(),
            delivery_tag,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.delivery_tag
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.delivery_tag, self.payload)
    }
}
