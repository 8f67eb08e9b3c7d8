//! Network links built on the interface layer.
//!
//! - **FluidDistributedIf**: boundary link coupling a local node to a remote
//!   network through a [`FluidBus`](crate::bus::FluidBus)
//! - **LumpedNode** / **LumpedCapacitor**: single-node host network for
//!   examples and tests
//!
//! ## Frame Sequence
//!
//! A host drives each link once per frame, in this order:
//!
//! 1. transport delivers the peer's latest record to the link's bus
//! 2. `process_inputs` arbitrates the role and applies incoming boundary data
//! 3. the host applies any capacitor edits
//! 4. [`NetworkLink::step`] produces the admittance and source terms
//! 5. the host solves its network
//! 6. [`NetworkLink::compute_flows`] and [`NetworkLink::transport_flows`]
//! 7. `process_outputs` fills the record for the peer

pub mod distributed_if;
pub mod lumped;

pub use distributed_if::FluidDistributedIf;
pub use lumped::{LumpedCapacitor, LumpedNode};

use crate::network::FluidNode;

/// A link between a network node and the solver, seen from the host's
/// per-step loop.
pub trait NetworkLink {
    /// Computes the admittance and source terms for the coming solve.
    fn step(&mut self, node: &mut dyn FluidNode, dt: f64);

    /// Computes the flux through the link from the solved node potential.
    fn compute_flows(&mut self, node: &mut dyn FluidNode, dt: f64);

    /// Moves the computed flux into or out of the node.
    fn transport_flows(&mut self, node: &mut dyn FluidNode, dt: f64);

    /// Clears non-persistent state before a checkpoint restart.
    fn restart(&mut self);

    /// Admittance contributed to the node's diagonal (kmol/s/kPa).
    fn admittance(&self) -> f64;

    /// Source contributed to the node's right-hand side (kmol/s).
    fn source(&self) -> f64;
}
