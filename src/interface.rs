//! Interface payload exchanged between the two halves of a distributed network.
//!
//! Each frame, every side of the pair publishes one [`InterfaceData`] record
//! and consumes the most recent record written by its peer. The record is
//! transport-agnostic: it derives `serde` traits so any middleware can carry
//! it, and it never assumes the peer uses the same number of fluid or trace
//! compound constituents as the local model.
//!
//! # Widths
//!
//! Three different mixture widths meet at an interface:
//!
//! - the **interface width** of this side's records (`num_fluid`/`num_tc`),
//! - the interface width of the peer's records,
//! - the **model width** of the local network's fluid configuration.
//!
//! All mixture transfers copy the overlapping prefix and either zero-fill or
//! leave alone the remainder, so width mismatches never fail.
//!
//! # Example
//!
//! ```
//! use tandem::interface::InterfaceData;
//!
//! let mut data = InterfaceData::new();
//! data.initialize(2, 0);
//! data.frame_count = 1;
//! data.set_mole_fractions(&[0.7, 0.3, 0.5]); // third entry does not fit
//!
//! let mut model = [1.0; 3];
//! data.get_mole_fractions(&mut model);
//! assert_eq!(model, [0.7, 0.3, 0.0]);
//! assert!(data.has_valid_data());
//! ```

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Version of the field order and widths of [`InterfaceData`] on the wire.
///
/// Both simulators of a pair must agree on this value.
pub const WIRE_VERSION: u32 = 1;

/// Copies the overlapping prefix of `src` into `dst` and zero-fills the rest of `dst`.
pub(crate) fn copy_zero_padded(dst: &mut [f64], src: &[f64]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}

/// Copies the overlapping prefix of `src` into `dst`, leaving the rest of `dst` untouched.
pub(crate) fn copy_truncated(dst: &mut [f64], src: &[f64]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// The record exchanged between the two sides every frame.
///
/// `source` is a pressure (Pa) when the sender is in Supply role and a molar
/// flow rate (mol/s) when the sender is in Demand role. `energy` is either a
/// specific enthalpy (J/kg) or a temperature (K), as agreed by the pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceData {
    /// Monotonic frame counter of the sender.
    pub frame_count: u32,
    /// Last `frame_count` the sender received from its peer.
    pub frame_loopback: u32,
    /// True when the sender is in Demand role.
    pub demand_mode: bool,
    /// Capacitance of the sender's local network (mol/Pa).
    pub capacitance: f64,
    /// Pressure (Supply) or flow rate (Demand).
    pub source: f64,
    /// Specific enthalpy or temperature.
    pub energy: f64,
    mole_fractions: Option<Vec<f64>>,
    tc_mole_fractions: Option<Vec<f64>>,
}

impl InterfaceData {
    /// Creates an uninitialized record with no mixture storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the mixture arrays.
    ///
    /// A zero width leaves the corresponding array absent. Calling this again
    /// discards the previous arrays and allocates new zeroed ones.
    pub fn initialize(&mut self, num_fluid: usize, num_tc: usize) {
        self.mole_fractions = (num_fluid > 0).then(|| vec![0.0; num_fluid]);
        self.tc_mole_fractions = (num_tc > 0).then(|| vec![0.0; num_tc]);
    }

    /// Number of bulk fluid constituents carried by this record.
    pub fn num_fluid(&self) -> usize {
        self.mole_fractions.as_ref().map_or(0, Vec::len)
    }

    /// Number of trace compounds carried by this record.
    pub fn num_tc(&self) -> usize {
        self.tc_mole_fractions.as_ref().map_or(0, Vec::len)
    }

    /// Bulk mole fractions, if allocated.
    pub fn mole_fractions(&self) -> Option<&[f64]> {
        self.mole_fractions.as_deref()
    }

    /// Trace compound mole fractions, if allocated.
    pub fn tc_mole_fractions(&self) -> Option<&[f64]> {
        self.tc_mole_fractions.as_deref()
    }

    /// Copies as many bulk mole fractions from `src` as fit in this record.
    pub fn set_mole_fractions(&mut self, src: &[f64]) {
        if let Some(dst) = self.mole_fractions.as_mut() {
            copy_truncated(dst, src);
        }
    }

    /// Copies this record's bulk mole fractions into `dst`, zero-filling any excess.
    pub fn get_mole_fractions(&self, dst: &mut [f64]) {
        copy_zero_padded(dst, self.mole_fractions.as_deref().unwrap_or_default());
    }

    /// Copies as many trace compound mole fractions from `src` as fit in this record.
    pub fn set_tc_mole_fractions(&mut self, src: &[f64]) {
        if let Some(dst) = self.tc_mole_fractions.as_mut() {
            copy_truncated(dst, src);
        }
    }

    /// Copies this record's trace compound mole fractions into `dst`, zero-filling any excess.
    pub fn get_tc_mole_fractions(&self, dst: &mut [f64]) {
        copy_zero_padded(dst, self.tc_mole_fractions.as_deref().unwrap_or_default());
    }

    /// Assigns the contents of `that` to this record.
    ///
    /// Scalars are always copied. Mixture contents are copied element-wise
    /// only when this record has been initialized and the array widths of
    /// both records match; the storage of this record is never resized.
    pub fn assign(&mut self, that: &InterfaceData) {
        self.frame_count = that.frame_count;
        self.frame_loopback = that.frame_loopback;
        self.demand_mode = that.demand_mode;
        self.capacitance = that.capacitance;
        self.source = that.source;
        self.energy = that.energy;
        copy_if_same_width(&mut self.mole_fractions, &that.mole_fractions);
        copy_if_same_width(&mut self.tc_mole_fractions, &that.tc_mole_fractions);
    }

    /// Returns whether this record carries usable data.
    ///
    /// Holds when the frame counter is non-zero, no mixture entry is
    /// negative, a Demand record has positive energy and a Supply record has
    /// non-negative capacitance.
    pub fn has_valid_data(&self) -> bool {
        let non_negative = |fractions: &Option<Vec<f64>>| {
            fractions.as_deref().unwrap_or_default().iter().all(|&x| x >= 0.0)
        };

        self.frame_count > 0
            && non_negative(&self.mole_fractions)
            && non_negative(&self.tc_mole_fractions)
            && (!self.demand_mode || self.energy > 0.0)
            && (self.demand_mode || self.capacitance >= 0.0)
    }
}

fn copy_if_same_width(dst: &mut Option<Vec<f64>>, src: &Option<Vec<f64>>) {
    if let (Some(dst), Some(src)) = (dst.as_mut(), src.as_ref()) {
        if dst.len() == src.len() {
            dst.copy_from_slice(src);
        }
    }
}

/// Marker trait for the kind of boundary condition a [`BoundaryState`] carries.
pub trait BoundaryKind {}

/// The boundary carries a pressure: Supply-side data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureBoundary;
impl BoundaryKind for PressureBoundary {}

/// The boundary carries a molar flow rate: Demand-side data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowBoundary;
impl BoundaryKind for FlowBoundary {}

/// User-facing view of one side's boundary condition.
///
/// The mixture buffers are sized to whatever width the owner chooses,
/// usually the local model width, and are filled from or copied into an
/// [`InterfaceData`] of any width.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryState<K: BoundaryKind> {
    value: f64,
    /// Specific enthalpy or temperature.
    pub energy: f64,
    mole_fractions: Vec<f64>,
    tc_mole_fractions: Vec<f64>,
    _kind: PhantomData<K>,
}

/// Pressure boundary presented by the Supply side.
pub type FluidState = BoundaryState<PressureBoundary>;

/// Flow demand presented by the Demand side.
pub type FlowState = BoundaryState<FlowBoundary>;

impl<K: BoundaryKind> BoundaryState<K> {
    /// Creates a zeroed state with the given mixture widths.
    pub fn new(num_fluid: usize, num_tc: usize) -> Self {
        BoundaryState {
            value: 0.0,
            energy: 0.0,
            mole_fractions: vec![0.0; num_fluid],
            tc_mole_fractions: vec![0.0; num_tc],
            _kind: PhantomData,
        }
    }

    /// Bulk mole fractions at this state's own width.
    pub fn mole_fractions(&self) -> &[f64] {
        &self.mole_fractions
    }

    /// Trace compound mole fractions at this state's own width.
    pub fn tc_mole_fractions(&self) -> &[f64] {
        &self.tc_mole_fractions
    }

    /// Copies bulk mole fractions into `dst`, zero-filling any excess.
    pub fn get_mole_fractions(&self, dst: &mut [f64]) {
        copy_zero_padded(dst, &self.mole_fractions);
    }

    /// Copies trace compound mole fractions into `dst`, zero-filling any excess.
    pub fn get_tc_mole_fractions(&self, dst: &mut [f64]) {
        copy_zero_padded(dst, &self.tc_mole_fractions);
    }

    /// Sets bulk mole fractions from `src`; entries beyond `src` become zero.
    pub fn set_mole_fractions(&mut self, src: &[f64]) {
        copy_zero_padded(&mut self.mole_fractions, src);
    }

    /// Sets trace compound mole fractions from `src`; entries beyond `src` become zero.
    pub fn set_tc_mole_fractions(&mut self, src: &[f64]) {
        copy_zero_padded(&mut self.tc_mole_fractions, src);
    }

    /// Zeroes every field, keeping the buffer widths.
    pub fn reset(&mut self) {
        self.value = 0.0;
        self.energy = 0.0;
        self.mole_fractions.fill(0.0);
        self.tc_mole_fractions.fill(0.0);
    }

    pub(crate) fn read_from(&mut self, data: &InterfaceData) {
        self.value = data.source;
        self.energy = data.energy;
        data.get_mole_fractions(&mut self.mole_fractions);
        data.get_tc_mole_fractions(&mut self.tc_mole_fractions);
    }

    pub(crate) fn write_to(&self, data: &mut InterfaceData) {
        data.source = self.value;
        data.energy = self.energy;
        data.set_mole_fractions(&self.mole_fractions);
        data.set_tc_mole_fractions(&self.tc_mole_fractions);
    }
}

impl FluidState {
    /// Boundary pressure (Pa).
    pub fn pressure(&self) -> f64 {
        self.value
    }

    /// Sets the boundary pressure (Pa).
    pub fn set_pressure(&mut self, pressure: f64) {
        self.value = pressure;
    }
}

impl FlowState {
    /// Demanded molar flow rate (mol/s), positive from the Supply side into the Demand side.
    pub fn flow_rate(&self) -> f64 {
        self.value
    }

    /// Sets the demanded molar flow rate (mol/s).
    pub fn set_flow_rate(&mut self, flow_rate: f64) {
        self.value = flow_rate;
    }
}
