//! Port abstraction layer for serial communication.
//!
//! Provides the channel and backend traits plus the hardware and mock
//! implementations, enabling dependency injection and testing via mocks.

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{ChannelCall, DiscoveryMode, MockBackend, MockOp, MockSerialPort, RecordedCall};
pub use sync_port::{SyncSerialPort, SystemBackend};
pub use traits::*;
