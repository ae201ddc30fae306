//! Selective-Repeat endpoints for the SR lab.
//! Provides the sender and receiver state machines; both talk to the
//! outside world only through [`SystemContext`].

pub mod receiver;
pub mod sender;

#[cfg(test)]
mod test_support;

pub use receiver::{ReceiveOutcome, ReceiverStats, SrReceiver};
pub use sender::{AckOutcome, SendOutcome, SenderStats, SlotStatus, SrSender};
pub use sr_lab_abstract::{Message, ProtocolConfig, Segment, SystemContext, TransportProtocol};

use sr_lab_abstract::ConfigError;

pub fn sender(config: &ProtocolConfig) -> Result<Box<dyn TransportProtocol>, ConfigError> {
    Ok(Box::new(SrSender::new(config)?))
}

pub fn receiver(config: &ProtocolConfig) -> Result<Box<dyn TransportProtocol>, ConfigError> {
    Ok(Box::new(SrReceiver::new(config)?))
}
