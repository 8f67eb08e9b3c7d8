//! # Tandem: Distributed Two-Way Fluid Interfaces
//!
//! Couples two independently running fluid network simulations through a
//! pair of interfaces that exchange one small record per frame over any
//! transport. Each side is either the pressure boundary (Supply) or the flow
//! boundary (Demand) of the pair, and the two sides negotiate those roles on
//! their own from the capacitance of their local networks.
//!
//! The crate is layered bottom-up:
//!
//! - [`interface`]: the exchanged record and the typed boundary states
//! - [`bus`]: role arbitration, frame counting and the demand flow limit
//! - [`network`]: what an interface needs from the host network
//! - [`registry`]: shared table through which sibling interfaces see each other
//! - [`models`]: the network link that puts it all together
//! - [`config`]: layered configuration of a link
//!
//! ## Example
//!
//! ```
//! use tandem::bus::{FluidBus, Role, RoleArbiter};
//!
//! let mut near = FluidBus::new();
//! let mut far = FluidBus::new();
//! near.initialize(false, 2, 0);
//! far.initialize(false, 2, 0);
//!
//! for _ in 0..3 {
//!     // The far network is ten times stiffer
//!     near.process_outputs(1.0);
//!     far.process_outputs(10.0);
//!     let (to_far, to_near) = (near.out_data().clone(), far.out_data().clone());
//!     near.receive(&to_near);
//!     far.receive(&to_far);
//!     near.process_inputs();
//!     far.process_inputs();
//! }
//!
//! assert_eq!(near.role(), Role::Demand);
//! assert_eq!(far.role(), Role::Supply);
//! ```
//!
//! ## Units
//!
//! The exchanged record is in SI base units (Pa, mol/s, mol/Pa). Host networks
//! work in kPa, kmol/s and kmol/kPa. Capacitance has the same numeric value
//! in both.

pub mod bus;
pub mod config;
pub mod interface;
pub mod models;
pub mod network;
pub mod notification;
pub mod registry;

pub use bus::{FluidBus, ForcedRole, Role, RoleArbiter};
pub use config::{DistributedIfConfig, DistributedIfInput, InterfaceSettings};
pub use interface::{FlowState, FluidState, InterfaceData};
pub use models::{FluidDistributedIf, NetworkLink};
pub use notification::{Notification, NotificationLevel};
pub use registry::{IfId, InterfaceRegistry};

/// Pascals per kilopascal.
pub const PA_PER_KPA: f64 = 1000.0;

/// Kilopascals per pascal.
pub const KPA_PER_PA: f64 = 0.001;

/// Moles per kilomole.
pub const MOL_PER_KMOL: f64 = 1000.0;

/// Kilomoles per mole.
pub const KMOL_PER_MOL: f64 = 0.001;

/// Errors raised by interface links.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Value out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),
}

impl From<figment::Error> for LinkError {
    fn from(err: figment::Error) -> Self {
        LinkError::Config(Box::new(err))
    }
}

/// Result type of interface link operations.
pub type LinkResult<T> = Result<T, LinkError>;
