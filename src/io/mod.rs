//! IO modules - external system interfaces
//!
//! - `serial_link` - resilient serial link to the gate controller
//! - `protocol` - controller commands and the frame classifier
//! - `fanout` - event delivery to connected observers
//! - `console` - operator console over stdin/stdout

pub mod console;
pub mod fanout;
pub mod protocol;
pub mod serial_link;

// Re-export commonly used types
pub use fanout::{Broadcaster, ObserverId, ObserverSink};
pub use protocol::{classify, Command, LinkEvent};
pub use serial_link::{GateCommander, LinkConnector, LinkSettings, SerialConnector, SerialLink};
