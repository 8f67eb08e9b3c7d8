//! Configuration and input data of a distributed fluid interface.
//!
//! Settings are plain `serde` structs, so a host can embed them in its own
//! configuration. [`InterfaceSettings::load`] layers them the usual way:
//! built-in defaults, then a TOML file, then `TANDEM_`-prefixed environment
//! variables (nested keys separated by `__`, e.g.
//! `TANDEM_CONFIG__IS_PAIR_MASTER=true`).
//!
//! ```toml
//! [config]
//! name = "cabin_if"
//! is_pair_master = true
//! use_enthalpy = true
//! num_if_fluid = 6
//!
//! [input]
//! force_supply_mode = false
//! ```

use crate::LinkResult;
use crate::bus::DEFAULT_MODING_CAPACITANCE_RATIO;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variables overriding settings.
pub const ENV_PREFIX: &str = "TANDEM_";

/// Static configuration of a distributed interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedIfConfig {
    /// Link name, used in diagnostics and in the sibling registry.
    pub name: String,
    /// Wins capacitance ties against the peer. Exactly one side of a pair should set this.
    pub is_pair_master: bool,
    /// Exchange specific enthalpy rather than temperature.
    pub use_enthalpy: bool,
    /// In Demand role, use the gain-limited conductance alone instead of
    /// combining it in series with the local capacitance.
    pub demand_option: bool,
    /// Supply-to-Demand capacitance ratio above which Supply volunteers to become Demand.
    pub moding_capacitance_ratio: f64,
    /// Bulk constituents on the wire; defaults to the model width.
    pub num_if_fluid: Option<usize>,
    /// Trace compounds on the wire; defaults to the model width.
    pub num_if_tc: Option<usize>,
    /// Index of the attached node in the host network.
    pub node_index: usize,
}

impl Default for DistributedIfConfig {
    fn default() -> Self {
        DistributedIfConfig {
            name: String::new(),
            is_pair_master: false,
            use_enthalpy: false,
            demand_option: true,
            moding_capacitance_ratio: DEFAULT_MODING_CAPACITANCE_RATIO,
            num_if_fluid: None,
            num_if_tc: None,
            node_index: 0,
        }
    }
}

/// Run-time input of a distributed interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedIfInput {
    /// Blockage malfunction activation.
    pub malf_blockage_flag: bool,
    /// Fraction of the conductance blocked by the malfunction, in [0, 1].
    pub malf_blockage_value: f64,
    /// Pin the interface to Demand role.
    pub force_demand_mode: bool,
    /// Pin the interface to Supply role.
    pub force_supply_mode: bool,
}

/// Configuration and input bundled for loading from one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceSettings {
    pub config: DistributedIfConfig,
    pub input: DistributedIfInput,
}

impl InterfaceSettings {
    /// Builds the layered provider: defaults, then `conf_file`, then environment.
    pub fn figment(conf_file: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(InterfaceSettings::default()))
            .merge(Toml::file(conf_file.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads settings from `conf_file` and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load(conf_file: impl AsRef<Path>) -> LinkResult<Self> {
        Ok(Self::figment(conf_file).extract()?)
    }

    /// Extracts settings from an arbitrary provider, for hosts with their own layering.
    pub fn from_figment(figment: &Figment) -> LinkResult<Self> {
        Ok(figment.extract()?)
    }
}
