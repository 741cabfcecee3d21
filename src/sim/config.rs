use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::mem::double_buffer::{Dataflow, DoubleBufferConfig};
use crate::mem::dram::Dram;
use crate::mem::llc::LlcConfig;
use crate::sim::workload::WorkloadConfig;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub num_pe: usize,
    pub log_level: u64,
    pub dataflow: Dataflow,
    pub verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_pe: 1,
            log_level: 0,
            dataflow: Dataflow::Ws,
            verbose: false,
        }
    }
}

/// One TOML table section per component; a missing section falls back to the
/// component's defaults.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

impl Config for SimConfig {}
impl Config for LlcConfig {}
impl Config for DoubleBufferConfig {}
impl Config for Dram {}
impl Config for WorkloadConfig {}
