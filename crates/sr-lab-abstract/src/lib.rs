pub mod checksum;
pub mod config;
pub mod interface;
pub mod scenario;
pub mod segment;
pub mod window;

pub use interface::{SystemContext, TransportProtocol};
pub use segment::{Corruption, Message, NOT_IN_USE, PAYLOAD_SIZE, Payload, Segment};

pub use config::{ConfigError, ProtocolConfig, SimConfig};
pub use scenario::{
    ProtocolConfigOverride, SimConfigOverride, TestAction, TestAssertion, TestScenario,
};
pub use window::{SequenceSpace, in_window};
