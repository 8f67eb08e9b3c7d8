//! Contract between a distributed interface and the host network it lives in.
//!
//! The host owns the nodes, the capacitors and the solver. An interface only
//! ever borrows the node it is attached to for the duration of a call, and
//! talks to the capacitor that sets the node's volume through a shared
//! handle. Pressures inside the host network are in kPa, molar flows in
//! kmol/s and capacitances in kmol/kPa.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// Fluid content of a network node.
///
/// Energy is carried both as temperature and as specific enthalpy; the
/// host's property library keeps the two consistent; an interface writes
/// whichever one its pair exchanges.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeContent {
    /// Pressure (kPa)
    pub pressure: f64,
    /// Temperature (K)
    pub temperature: f64,
    /// Specific enthalpy (J/kg)
    pub specific_enthalpy: f64,
    /// Bulk constituent mole fractions, one per model constituent
    pub mole_fractions: Vec<f64>,
    /// Trace compound mole fractions, one per model trace compound
    pub tc_mole_fractions: Vec<f64>,
}

impl NodeContent {
    /// Creates an empty content of the given model widths.
    pub fn new(num_fluid: usize, num_tc: usize) -> Self {
        NodeContent {
            pressure: 0.0,
            temperature: 0.0,
            specific_enthalpy: 0.0,
            mole_fractions: vec![0.0; num_fluid],
            tc_mole_fractions: vec![0.0; num_tc],
        }
    }

    /// Number of bulk constituents in the model.
    pub fn num_fluid(&self) -> usize {
        self.mole_fractions.len()
    }

    /// Number of trace compounds in the model.
    pub fn num_tc(&self) -> usize {
        self.tc_mole_fractions.len()
    }

    /// Energy as exchanged over an interface: enthalpy or temperature.
    pub fn energy(&self, use_enthalpy: bool) -> f64 {
        if use_enthalpy { self.specific_enthalpy } else { self.temperature }
    }

    /// Sets the exchanged energy quantity.
    pub fn set_energy(&mut self, use_enthalpy: bool, energy: f64) {
        if use_enthalpy {
            self.specific_enthalpy = energy;
        } else {
            self.temperature = energy;
        }
    }
}

/// Normalizes `fractions` in place so they sum to one.
///
/// Returns the original sum, or `None` (leaving `fractions` untouched) if the
/// sum is too small to normalize.
pub fn normalize(fractions: &mut [f64]) -> Option<f64> {
    let sum: f64 = fractions.iter().sum();
    if sum < f64::EPSILON {
        return None;
    }
    fractions.iter_mut().for_each(|x| *x /= sum);
    Some(sum)
}

/// Direction of flow through a link port, relative to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortDirection {
    /// No flow.
    #[default]
    None,
    /// Flow leaves the node into the link.
    Source,
    /// Flow enters the node from the link.
    Sink,
}

impl PortDirection {
    /// Classifies a flux, positive when leaving the node.
    pub fn from_flux(flux: f64) -> Self {
        if flux > f64::EPSILON {
            PortDirection::Source
        } else if flux < -f64::EPSILON {
            PortDirection::Sink
        } else {
            PortDirection::None
        }
    }
}

/// A node of the host network, as seen by a link attached to it.
pub trait FluidNode {
    /// Solved pressure of the node (kPa).
    fn potential(&self) -> f64;

    /// Capacitance of the network as seen from this node (kmol/kPa).
    fn network_capacitance(&self) -> f64;

    /// Pressure response of every network node to the capacitance probe at
    /// this node, indexed by network node index. Empty when the host does not
    /// compute it.
    fn net_cap_delta_potential(&self) -> &[f64];

    /// Current volume of the node (m3).
    fn volume(&self) -> f64;

    /// Fluid content of the node.
    fn content(&self) -> &NodeContent;

    /// Mutable fluid content of the node.
    fn content_mut(&mut self) -> &mut NodeContent;

    /// Announces a flux that will leave the node this step (kmol/s).
    fn schedule_outflux(&mut self, flux: f64);

    /// Adds a flux entering the node (kmol/s) carrying `fluid`.
    fn collect_influx(&mut self, flux: f64, fluid: &NodeContent);

    /// Adds a flux leaving the node (kmol/s).
    fn collect_outflux(&mut self, flux: f64);
}

/// The host element that owns a node's volume.
pub trait Capacitor: Debug {
    /// Volume currently set on the node (m3).
    fn volume(&self) -> f64;

    /// Requests a change of the node's volume; `enable = false` cancels a pending edit.
    fn edit_volume(&mut self, enable: bool, volume: f64);
}

/// Shared handle to a host capacitor.
pub type CapacitorHandle = Rc<RefCell<dyn Capacitor>>;
