//! Lumped single-node host network.
//!
//! A minimal [`FluidNode`] with linear capacitance, plus the [`Capacitor`]
//! that owns its volume. It is enough to drive a distributed interface
//! through whole frames in examples and tests, standing in for a real
//! network solver.
//!
//! The node's capacitance is `volume * capacitance_per_volume +
//! external_capacitance`, where the external part represents the rest of the
//! local network behind the node.
//!
//! # Example
//!
//! ```
//! use tandem::models::{LumpedCapacitor, LumpedNode};
//! use tandem::network::{Capacitor, FluidNode};
//!
//! let mut node = LumpedNode::new(2, 0)
//!     .with_volume(2.0)
//!     .with_capacitance_per_volume(0.01)
//!     .with_pressure(101.325);
//! let mut capacitor = LumpedCapacitor::new(2.0);
//!
//! capacitor.edit_volume(true, 0.5);
//! capacitor.apply(&mut node);
//! assert_eq!(node.volume(), 0.5);
//! assert!((node.network_capacitance() - 0.005).abs() < 1e-12);
//! ```

use crate::interface::copy_zero_padded;
use crate::network::{Capacitor, FluidNode, NodeContent, normalize};

/// Single well-mixed node with linear pressure/moles relation.
#[derive(Debug, Clone)]
pub struct LumpedNode {
    content: NodeContent,
    potential: f64,
    volume: f64,
    capacitance_per_volume: f64,
    external_capacitance: f64,
    external_flux: f64,
    delta_potential: Vec<f64>,
    scheduled_outflux: f64,
    influx: f64,
    outflux: f64,
    influx_moles: Vec<f64>,
    influx_tc_moles: Vec<f64>,
}

impl LumpedNode {
    /// Creates an empty node with the given model widths.
    pub fn new(num_fluid: usize, num_tc: usize) -> Self {
        LumpedNode {
            content: NodeContent::new(num_fluid, num_tc),
            potential: 0.0,
            volume: 0.0,
            capacitance_per_volume: 0.0,
            external_capacitance: 0.0,
            external_flux: 0.0,
            delta_potential: Vec::new(),
            scheduled_outflux: 0.0,
            influx: 0.0,
            outflux: 0.0,
            influx_moles: vec![0.0; num_fluid],
            influx_tc_moles: vec![0.0; num_tc],
        }
    }

    /// Sets the node volume (m3).
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Sets the capacitance per unit volume (kmol/kPa/m3).
    pub fn with_capacitance_per_volume(mut self, capacitance: f64) -> Self {
        self.capacitance_per_volume = capacitance;
        self
    }

    /// Sets the capacitance of the rest of the network (kmol/kPa).
    pub fn with_external_capacitance(mut self, capacitance: f64) -> Self {
        self.external_capacitance = capacitance;
        self
    }

    /// Sets both the stored and the solved pressure (kPa).
    pub fn with_pressure(mut self, pressure: f64) -> Self {
        self.content.pressure = pressure;
        self.potential = pressure;
        self
    }

    /// Sets the temperature (K).
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.content.temperature = temperature;
        self
    }

    /// Sets the specific enthalpy (J/kg).
    pub fn with_specific_enthalpy(mut self, enthalpy: f64) -> Self {
        self.content.specific_enthalpy = enthalpy;
        self
    }

    /// Sets the bulk mole fractions, zero-padded or truncated to the model width.
    pub fn with_mole_fractions(mut self, fractions: &[f64]) -> Self {
        copy_zero_padded(&mut self.content.mole_fractions, fractions);
        self
    }

    /// Sets the capacitance probe response across the network.
    pub fn with_delta_potential(mut self, delta_potential: Vec<f64>) -> Self {
        self.delta_potential = delta_potential;
        self
    }

    /// Sets a constant flux leaving the node to the rest of the network (kmol/s).
    pub fn set_external_flux(&mut self, flux: f64) {
        self.external_flux = flux;
    }

    /// Sets the node volume (m3).
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }

    /// Outflux announced by links this step (kmol/s).
    pub fn scheduled_outflux(&self) -> f64 {
        self.scheduled_outflux
    }

    /// Influx collected from links this step (kmol/s).
    pub fn influx(&self) -> f64 {
        self.influx
    }

    /// Outflux collected from links this step (kmol/s).
    pub fn outflux(&self) -> f64 {
        self.outflux
    }

    /// Solves the node pressure with one link's admittance (kmol/s/kPa) and source (kmol/s).
    pub fn solve(&mut self, dt: f64, admittance: f64, source: f64) {
        let storage = self.network_capacitance() / dt;
        let denominator = storage + admittance;
        if denominator > f64::EPSILON {
            self.potential =
                (storage * self.content.pressure + source - self.external_flux) / denominator;
        }
    }

    /// Integrates the collected fluxes over `dt` and clears them.
    pub fn update(&mut self, dt: f64) {
        let capacitance = self.network_capacitance();
        let moles = capacitance * self.content.pressure;
        let incoming = self.influx * dt;
        if incoming > 0.0 && moles + incoming > f64::EPSILON {
            let total = moles + incoming;
            for (x, n_in) in self.content.mole_fractions.iter_mut().zip(&self.influx_moles) {
                *x = (*x * moles + n_in * dt) / total;
            }
            for (x, n_in) in self.content.tc_mole_fractions.iter_mut().zip(&self.influx_tc_moles) {
                *x = (*x * moles + n_in * dt) / total;
            }
            normalize(&mut self.content.mole_fractions);
        }

        if capacitance > f64::EPSILON {
            self.content.pressure +=
                (self.influx - self.outflux - self.external_flux) * dt / capacitance;
        }
        self.potential = self.content.pressure;

        self.scheduled_outflux = 0.0;
        self.influx = 0.0;
        self.outflux = 0.0;
        self.influx_moles.fill(0.0);
        self.influx_tc_moles.fill(0.0);
    }
}

impl FluidNode for LumpedNode {
    fn potential(&self) -> f64 {
        self.potential
    }

    fn network_capacitance(&self) -> f64 {
        self.volume * self.capacitance_per_volume + self.external_capacitance
    }

    fn net_cap_delta_potential(&self) -> &[f64] {
        &self.delta_potential
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn content(&self) -> &NodeContent {
        &self.content
    }

    fn content_mut(&mut self) -> &mut NodeContent {
        &mut self.content
    }

    fn schedule_outflux(&mut self, flux: f64) {
        self.scheduled_outflux += flux;
    }

    fn collect_influx(&mut self, flux: f64, fluid: &NodeContent) {
        self.influx += flux;
        for (n, x) in self.influx_moles.iter_mut().zip(&fluid.mole_fractions) {
            *n += flux * x;
        }
        for (n, x) in self.influx_tc_moles.iter_mut().zip(&fluid.tc_mole_fractions) {
            *n += flux * x;
        }
    }

    fn collect_outflux(&mut self, flux: f64) {
        self.outflux += flux;
    }
}

/// Capacitor owning the volume of a [`LumpedNode`].
///
/// Volume edits are requested at any time and take effect when the host
/// applies the capacitor to its node.
#[derive(Debug, Clone, Default)]
pub struct LumpedCapacitor {
    volume: f64,
    pending_edit: Option<f64>,
}

impl LumpedCapacitor {
    /// Creates a capacitor for a node of the given volume (m3).
    pub fn new(volume: f64) -> Self {
        LumpedCapacitor { volume, pending_edit: None }
    }

    /// Volume edit waiting to be applied.
    pub fn pending_edit(&self) -> Option<f64> {
        self.pending_edit
    }

    /// Applies a pending edit to `node`.
    pub fn apply(&mut self, node: &mut LumpedNode) {
        if let Some(volume) = self.pending_edit.take() {
            self.volume = volume;
            node.set_volume(volume);
        }
    }
}

impl Capacitor for LumpedCapacitor {
    fn volume(&self) -> f64 {
        self.volume
    }

    fn edit_volume(&mut self, enable: bool, volume: f64) {
        self.pending_edit = enable.then_some(volume);
    }
}
