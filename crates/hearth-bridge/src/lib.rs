//! Hearth bridge runtime.
//!
//! Everything with a side effect lives here: the dual-port UDP
//! transport, the storage backends behind the core's [`hearth_core::KvStore`]
//! trait, the DNS-SD advertiser, sensor ingestion, and the protocol
//! coordinator that owns all mutable protocol state and runs the main
//! loop. The `hearth-bridge` binary wires these together from CLI
//! arguments.

pub mod coordinator;
pub mod dnssd;
pub mod error;
pub mod sensor;
pub mod storage;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use dnssd::{DnssdAdvertiser, DnssdConfig};
pub use error::BridgeError;
pub use sensor::{SensorQueue, SensorSample};
pub use storage::{MemoryStorage, RedbStorage};
pub use transport::{PortKind, RxPacket, TransportConfig, UdpTransport};
