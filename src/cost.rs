use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Hourly rate used for model identifiers missing from the rate table
pub const DEFAULT_GPU_RATE_PER_HOUR: f64 = 1.10;

/// Fraction of the GPU cost the platform adds on top as a service fee
pub const SERVICE_FEE_FRACTION: f64 = 0.10;

lazy_static! {
    // Assumed hardware tiers: SadTalker on an A100, Wav2Lip on an RTX 4090
    static ref GPU_RATES_PER_HOUR: HashMap<&'static str, f64> =
        HashMap::from([("sadtalker", 1.20), ("wav2lip", 0.50)]);
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub gpu_seconds: f64,
    pub gpu_rate_per_hour: f64,
    pub gpu_cost: f64,
    pub service_fee: f64,
    /// GPU cost plus service fee
    pub computed_cost: f64,
}

impl CostEstimate {
    pub fn gpu_hours(&self) -> f64 {
        self.gpu_seconds / 3600.0
    }
}

/// Hourly rate for a model identifier, matched case-insensitively.
pub fn hourly_rate(model_id: &str) -> f64 {
    GPU_RATES_PER_HOUR
        .get(model_id.to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_GPU_RATE_PER_HOUR)
}

pub fn estimate_cost(elapsed_seconds: f64, model_id: &str) -> CostEstimate {
    estimate_cost_at_rate(elapsed_seconds, hourly_rate(model_id))
}

pub fn estimate_cost_at_rate(elapsed_seconds: f64, gpu_rate_per_hour: f64) -> CostEstimate {
    let gpu_seconds = elapsed_seconds.max(0.0);
    let gpu_cost = (gpu_seconds / 3600.0) * gpu_rate_per_hour;
    let service_fee = gpu_cost * SERVICE_FEE_FRACTION;

    CostEstimate {
        gpu_seconds,
        gpu_rate_per_hour,
        gpu_cost,
        service_fee,
        computed_cost: gpu_cost + service_fee,
    }
}
