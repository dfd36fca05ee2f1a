//! Protocol core for the Hearth Matter bridge.
//!
//! Pure state machines for everything between the wire and the sensor:
//! secured sessions, the attribute store with change fan-out, the fixed
//! cluster layout, Interaction Model request handling, subscriptions,
//! fabric persistence and the PASE commissioning handshake.
//!
//! Nothing in this crate performs I/O or reads a clock. Time arrives as
//! method parameters, randomness through an injected RNG, and
//! persistence through the [`storage::KvStore`] trait; the bridge crate
//! supplies all three. This keeps every state machine deterministic
//! under test.

pub mod attributes;
pub mod clusters;
pub mod commissioning;
pub mod error;
pub mod fabric;
pub mod interaction;
pub mod pase;
pub mod session;
pub mod storage;
pub mod subscriptions;

pub use attributes::{AttributePath, AttributeStore, AttributeValue, SetOutcome};
pub use clusters::read_attribute;
pub use commissioning::{CommissioningManager, CommissioningState, PaseResponse};
pub use error::CoreError;
pub use fabric::{Fabric, FabricTable, MAX_FABRICS};
pub use interaction::{AttributeReport, ReadRequest, Status, SubscribeRequest};
pub use pase::{PaseEngine, PaseState};
pub use session::{MAX_SESSIONS, SessionManager, UNSECURED_SESSION_ID};
pub use storage::{KvStore, StorageError};
pub use subscriptions::{MAX_SUBSCRIPTIONS, Subscription, SubscriptionManager};
