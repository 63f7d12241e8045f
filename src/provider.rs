//! # Compute Provider Selection
//!
//! The speech engines run on a compute provider chosen once in the
//! configuration (`provider = "cpu"`). The same provider is handed to the
//! segmentation, recognition and synthesis engines so a deployment never runs
//! one model on the accelerator and another on the CPU by accident.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute providers understood by the model-serving engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeProvider {
    /// Plain CPU inference
    #[default]
    Cpu,
    /// NVIDIA GPU via CUDA
    #[serde(alias = "gpu")]
    Cuda,
    /// Apple Neural Engine / GPU via CoreML
    #[serde(alias = "metal")]
    CoreMl,
}

impl ComputeProvider {
    /// Name used on the wire when talking to an engine.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeProvider::Cpu => "cpu",
            ComputeProvider::Cuda => "cuda",
            ComputeProvider::CoreMl => "coreml",
        }
    }
}

impl fmt::Display for ComputeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
