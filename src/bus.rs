//! Role arbitration and gain-limited flow control between two simulators.
//!
//! A [`FluidBus`] sits on one side of a distributed fluid network. Every
//! frame it reads the record last written by its peer, decides whether this
//! side presents the pressure boundary (Supply) or the flow boundary
//! (Demand), and fills the record going back.
//!
//! # Arbitration
//!
//! The side with the stiffer local network (higher capacitance) should be
//! Supply: its pressure moves least when the other side draws on it. When
//! both sides claim Supply the softer side takes Demand, with the pair
//! master breaking ties. A Supply side whose Demand peer turns out to be much
//! stiffer volunteers to become Demand itself, but only after a full
//! measured round trip has elapsed since its last flip so that stale data
//! cannot make the pair thrash.
//!
//! # Example
//!
//! ```
//! use tandem::bus::{FluidBus, Role, RoleArbiter};
//!
//! let mut master = FluidBus::new();
//! let mut slave = FluidBus::new();
//! master.initialize(true, 2, 0);
//! slave.initialize(false, 2, 0);
//!
//! for _ in 0..4 {
//!     master.process_outputs(1.0);
//!     slave.process_outputs(1.0);
//!     let (to_slave, to_master) = (master.out_data().clone(), slave.out_data().clone());
//!     master.receive(&to_master);
//!     slave.receive(&to_slave);
//!     master.process_inputs();
//!     slave.process_inputs();
//! }
//!
//! assert_eq!(master.role(), Role::Demand);
//! assert_eq!(slave.role(), Role::Supply);
//! ```

use crate::interface::{FlowState, FluidState, InterfaceData};
use crate::notification::{Notification, NotificationLevel, NotificationQueue};
use log::debug;

/// Supply-to-Demand capacitance ratio above which Supply volunteers to become Demand.
pub const DEFAULT_MODING_CAPACITANCE_RATIO: f64 = 1.25;

/// Gain scale of the latency filter.
const DEMAND_FILTER_CONST_A: f64 = 1.5;

/// Per-frame gain decay of the latency filter.
const DEMAND_FILTER_CONST_B: f64 = 0.75;

/// Exponent ceiling, keeps the filter term away from underflow.
const MAX_FILTER_EXPONENT: u32 = 100;

/// Upper clamp of the Supply/Demand capacitance ratio used by the gain blend.
const MAX_CAPACITANCE_RATIO: f64 = 1.25;

/// Boundary role of one side of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Presents a pressure and composition boundary to the peer.
    #[default]
    Supply,
    /// Presents a consumption flow boundary to the peer.
    Demand,
}

/// Override of the arbitrated role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForcedRole {
    #[default]
    None,
    Demand,
    Supply,
}

/// Capability of arbitrating a boundary role with a remote peer.
pub trait RoleArbiter {
    /// Current role of this side.
    fn role(&self) -> Role;

    /// Pins this side to Demand from the next frame on.
    fn force_demand_role(&mut self);

    /// Pins this side to Supply from the next frame on.
    fn force_supply_role(&mut self);

    /// Returns to normal arbitration from the next frame on.
    fn reset_force_role(&mut self);

    /// Takes the pending diagnostic, if any.
    fn pop_notification(&mut self) -> Option<Notification>;

    /// Returns whether this side is in Demand role.
    fn is_demand_role(&self) -> bool {
        self.role() == Role::Demand
    }
}

/// Role arbitrator and payload marshaler for one side of a fluid interface.
#[derive(Debug, Clone)]
pub struct FluidBus {
    is_pair_master: bool,
    in_data: InterfaceData,
    out_data: InterfaceData,
    in_data_last_demand_mode: bool,
    last_in_frame_count: u32,
    fresh_data: bool,
    frames_since_flip: u32,
    loop_latency: u32,
    forced_role: ForcedRole,
    moding_capacitance_ratio: f64,
    demand_limit_gain: f64,
    demand_limit_flow_rate: f64,
    notifications: NotificationQueue,
}

impl Default for FluidBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FluidBus {
    /// Creates an uninitialized bus in Supply role.
    pub fn new() -> Self {
        FluidBus {
            is_pair_master: false,
            in_data: InterfaceData::new(),
            out_data: InterfaceData::new(),
            in_data_last_demand_mode: false,
            last_in_frame_count: 0,
            fresh_data: false,
            frames_since_flip: 0,
            loop_latency: 0,
            forced_role: ForcedRole::None,
            moding_capacitance_ratio: DEFAULT_MODING_CAPACITANCE_RATIO,
            demand_limit_gain: 0.0,
            demand_limit_flow_rate: 0.0,
            notifications: NotificationQueue::new(),
        }
    }

    /// Sizes the payloads and starts this side in Supply role.
    ///
    /// Supply is the start-up role even when a role is being forced; the
    /// force is applied on the next frame.
    pub fn initialize(&mut self, is_pair_master: bool, num_if_fluid: usize, num_if_tc: usize) {
        self.is_pair_master = is_pair_master;
        self.in_data.initialize(num_if_fluid, num_if_tc);
        self.out_data.initialize(num_if_fluid, num_if_tc);
        self.out_data.demand_mode = false;
        self.in_data_last_demand_mode = false;
        self.last_in_frame_count = 0;
        self.fresh_data = false;
        self.frames_since_flip = 0;
        self.loop_latency = 0;
        self.notifications.clear();
    }

    /// Sets the capacitance ratio threshold of the Supply-to-Demand flip test.
    pub fn set_moding_capacitance_ratio(&mut self, ratio: f64) {
        self.moding_capacitance_ratio = ratio;
    }

    /// Stores the latest record received from the peer.
    ///
    /// This is the hook for the external transport; it is expected at most
    /// once per local frame.
    pub fn receive(&mut self, data: &InterfaceData) {
        self.in_data.assign(data);
    }

    /// Mutable access to the incoming record, for transports that write in place.
    pub fn in_data_mut(&mut self) -> &mut InterfaceData {
        &mut self.in_data
    }

    /// Last record received from the peer.
    pub fn in_data(&self) -> &InterfaceData {
        &self.in_data
    }

    /// Record to be sent to the peer.
    pub fn out_data(&self) -> &InterfaceData {
        &self.out_data
    }

    /// Whether this side wins capacitance ties.
    pub fn is_pair_master(&self) -> bool {
        self.is_pair_master
    }

    /// Frames since the last role change.
    pub fn frames_since_flip(&self) -> u32 {
        self.frames_since_flip
    }

    /// Measured round-trip latency in local frames.
    pub fn loop_latency(&self) -> u32 {
        self.loop_latency
    }

    /// Currently requested role override.
    pub fn forced_role(&self) -> ForcedRole {
        self.forced_role
    }

    /// Gain of the last demand limit estimate.
    pub fn demand_limit_gain(&self) -> f64 {
        self.demand_limit_gain
    }

    /// Flow rate of the last demand limit estimate (mol/s).
    pub fn demand_limit_flow_rate(&self) -> f64 {
        self.demand_limit_flow_rate
    }

    /// Whether the last `process_inputs` consumed a new, valid peer record.
    pub fn has_fresh_data(&self) -> bool {
        self.fresh_data
    }

    /// Returns whether a diagnostic is waiting.
    pub fn has_notification(&self) -> bool {
        self.notifications.has_notification()
    }

    /// Arbitrates the role for this frame from the peer's latest record.
    ///
    /// Call once per frame before the local network is stepped. Never blocks:
    /// a frame without usable peer data leaves the role as it was. A record
    /// whose frame count has not advanced since the last frame is not new
    /// data.
    pub fn process_inputs(&mut self) {
        self.frames_since_flip = self.frames_since_flip.saturating_add(1);

        self.fresh_data = self.in_data.has_valid_data()
            && self.in_data.frame_count != self.last_in_frame_count;
        if !self.fresh_data {
            debug!("no new interface data this frame (frame {})", self.out_data.frame_count);
            self.loop_latency = self.loop_latency.max(1);
            self.apply_forced_role();
            self.advance_frame();
            return;
        }

        self.last_in_frame_count = self.in_data.frame_count;
        self.loop_latency = self.out_data.frame_count.saturating_sub(self.in_data.frame_loopback);

        if !self.apply_forced_role() {
            self.arbitrate();
        }

        self.advance_frame();
        self.in_data_last_demand_mode = self.in_data.demand_mode;
    }

    /// Publishes the local capacitance and runs the Supply-to-Demand flip test.
    ///
    /// Call once per frame after the local network state is known and after
    /// the outgoing boundary state has been set.
    pub fn process_outputs(&mut self, capacitance: f64) {
        self.out_data.capacitance = capacitance;

        if self.apply_forced_role() {
            return;
        }

        if !self.out_data.demand_mode
            && self.in_data.demand_mode
            && self.in_data.capacitance > self.moding_capacitance_ratio * capacitance
            && self.frames_since_flip > self.loop_latency
        {
            self.flip_to_demand();
        }
    }

    /// Sets the outgoing pressure boundary. Refused unless in Supply role.
    pub fn set_fluid_state(&mut self, state: &FluidState) {
        if self.out_data.demand_mode {
            self.notifications.push(
                NotificationLevel::Warn,
                "setFluidState was called when in the Demand role, ignored.",
            );
            return;
        }
        state.write_to(&mut self.out_data);
    }

    /// Sets the outgoing flow demand. Refused unless in Demand role.
    pub fn set_flow_state(&mut self, state: &FlowState) {
        if !self.out_data.demand_mode {
            self.notifications.push(
                NotificationLevel::Warn,
                "setFlowState was called when in the Supply role, ignored.",
            );
            return;
        }
        state.write_to(&mut self.out_data);
    }

    /// Fills `state` with the peer's pressure boundary.
    ///
    /// Succeeds only in Demand role while the peer is presenting valid Supply
    /// data; otherwise `state` is zeroed and false is returned.
    pub fn get_fluid_state(&self, state: &mut FluidState) -> bool {
        if self.out_data.demand_mode && !self.in_data.demand_mode && self.in_data.has_valid_data() {
            state.read_from(&self.in_data);
            true
        } else {
            state.reset();
            false
        }
    }

    /// Fills `state` with the peer's flow demand.
    ///
    /// Succeeds only in Supply role while the peer is presenting valid Demand
    /// data; otherwise `state` is zeroed and false is returned.
    pub fn get_flow_state(&self, state: &mut FlowState) -> bool {
        if !self.out_data.demand_mode && self.in_data.demand_mode && self.in_data.has_valid_data() {
            state.read_from(&self.in_data);
            true
        } else {
            state.reset();
            false
        }
    }

    /// Estimates the flow the Demand side may draw this step without
    /// overshooting the Supply side's pressure.
    ///
    /// The gain shrinks with the measured round trip and grows back towards 1
    /// as the Supply side becomes stiffer than the Demand side, so that the
    /// correction applied within one step is only as aggressive as the
    /// feedback loop can tolerate. Returns the cached flow rate unchanged
    /// when not in Demand role, when either capacitance is not positive or
    /// when `timestep` is zero.
    pub fn compute_demand_limit(&mut self, timestep: f64, demand_side_p: f64) -> f64 {
        let cd = self.out_data.capacitance;
        let cs = self.in_data.capacitance;
        if !self.out_data.demand_mode || cd <= 0.0 || cs <= 0.0 || timestep <= 0.0 {
            return self.demand_limit_flow_rate;
        }

        let cs_over_cd = (cs / cd).clamp(1.0, MAX_CAPACITANCE_RATIO);
        self.demand_limit_gain = demand_limit_gain(self.loop_latency, cs_over_cd);
        self.demand_limit_flow_rate = self.demand_limit_gain * (demand_side_p - self.in_data.source)
            / timestep
            / (1.0 / cd + 1.0 / cs);
        self.demand_limit_flow_rate
    }

    /// Applies any role override. Returns true if a role is being forced.
    fn apply_forced_role(&mut self) -> bool {
        match self.forced_role {
            ForcedRole::None => false,
            ForcedRole::Demand => {
                if !self.out_data.demand_mode {
                    self.flip_to_demand();
                }
                self.frames_since_flip = 0;
                true
            }
            ForcedRole::Supply => {
                if self.out_data.demand_mode {
                    self.flip_to_supply();
                }
                self.frames_since_flip = 0;
                true
            }
        }
    }

    fn arbitrate(&mut self) {
        match (self.out_data.demand_mode, self.in_data.demand_mode) {
            // Both in Demand: the peer just claimed it, so yield. If the peer
            // already claimed Demand last frame it has yet to see our claim.
            (true, true) => {
                if !self.in_data_last_demand_mode {
                    self.flip_to_supply();
                }
            }
            (false, false) => {
                let local = self.out_data.capacitance;
                let remote = self.in_data.capacitance;
                if local < remote || (local == remote && self.is_pair_master) {
                    self.flip_to_demand();
                }
            }
            _ => {}
        }
    }

    fn advance_frame(&mut self) {
        self.out_data.frame_count = self.out_data.frame_count.wrapping_add(1);
        self.out_data.frame_loopback = self.in_data.frame_count;
    }

    fn flip_to_demand(&mut self) {
        self.out_data.demand_mode = true;
        self.out_data.source = 0.0;
        self.frames_since_flip = 0;
        self.notifications.push(NotificationLevel::Info, "switched to Demand mode.");
    }

    fn flip_to_supply(&mut self) {
        self.out_data.demand_mode = false;
        self.frames_since_flip = 0;
        self.notifications.push(NotificationLevel::Info, "switched to Supply mode.");
    }
}

/// Latency- and stiffness-limited gain of the Demand side's correction.
///
/// The exponent is clipped to `[1, 100]`, so a latency of 0 behaves like a
/// latency of 1, and the latency term is clipped to `[0, 1]` before blending.
fn demand_limit_gain(loop_latency: u32, cs_over_cd: f64) -> f64 {
    let exponent = loop_latency.clamp(1, MAX_FILTER_EXPONENT) as i32;
    let gain_limit = (DEMAND_FILTER_CONST_A * DEMAND_FILTER_CONST_B.powi(exponent)).clamp(0.0, 1.0);
    gain_limit + (1.0 - gain_limit) * (cs_over_cd - 1.0) * 4.0
}

impl RoleArbiter for FluidBus {
    fn role(&self) -> Role {
        if self.out_data.demand_mode { Role::Demand } else { Role::Supply }
    }

    fn force_demand_role(&mut self) {
        self.forced_role = ForcedRole::Demand;
    }

    fn force_supply_role(&mut self) {
        self.forced_role = ForcedRole::Supply;
    }

    fn reset_force_role(&mut self) {
        self.forced_role = ForcedRole::None;
    }

    fn pop_notification(&mut self) -> Option<Notification> {
        self.notifications.pop()
    }
}
