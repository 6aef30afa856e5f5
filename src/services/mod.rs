//! Services - business logic and state management
//!
//! - `sensors` - beam state board and the live snapshot query
//! - `event_router` - classifies link frames and dispatches them
//! - `store` - slot/session storage collaborator
//! - `tokens` - QR claim-token store and expiry sweeper
//! - `reservations` - slot/session state machine with entry rollback
//! - `api` - boundary API used by front ends
//! - `error` - claim rejections and internal failures

pub mod api;
pub mod error;
pub mod event_router;
pub mod reservations;
pub mod sensors;
pub mod store;
pub mod tokens;

// Re-export commonly used types
pub use api::ParkingApi;
pub use error::{ClaimError, Rejection};
pub use event_router::EventRouter;
pub use reservations::Reservations;
pub use sensors::{SensorBoard, SensorOracle, SensorProbe};
pub use store::{MemoryStore, ParkingStore};
pub use tokens::{ClaimTokenStore, MemoryTokenStore};
