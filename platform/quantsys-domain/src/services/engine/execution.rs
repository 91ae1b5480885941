use crate::errors::BacktestError;
use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};

const BPS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    None,
    /// Shifts the event price by `bps / 10_000` against the trader.
    FixedBps { bps: f64 },
    /// Scales `bps` by `quantity / reference_volume`. Events without a
    /// positive volume fall back to `FixedBps { bps }`.
    VolumeProportional { bps: f64, reference_volume: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillPolicy {
    /// Fill at the next event for the same instrument, strictly after the
    /// order was created.
    ImmediateAtNextEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub commission_rate: f64,
    pub commission_fixed: f64,
    pub slippage: SlippageModel,
    pub fill_policy: FillPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::frictionless()
    }
}

impl ExecutionConfig {
    pub fn frictionless() -> Self {
        Self {
            commission_rate: 0.0,
            commission_fixed: 0.0,
            slippage: SlippageModel::None,
            fill_policy: FillPolicy::ImmediateAtNextEvent,
        }
    }

    /// Builds a config from the flat option names used in configuration files.
    pub fn from_options(
        commission_rate: f64,
        commission_fixed: f64,
        slippage_model: &str,
        slippage_bps: f64,
        reference_volume: Option<f64>,
    ) -> Result<Self, BacktestError> {
        let slippage = match slippage_model.trim().to_lowercase().as_str() {
            "none" => {
                if slippage_bps != 0.0 {
                    return Err(BacktestError::Config(
                        "slippage_model=none does not accept a non-zero slippage_bps".to_string(),
                    ));
                }
                SlippageModel::None
            }
            "fixed_bps" => SlippageModel::FixedBps { bps: slippage_bps },
            "volume_proportional" => {
                let Some(reference_volume) = reference_volume else {
                    return Err(BacktestError::Config(
                        "slippage_model=volume_proportional requires reference_volume".to_string(),
                    ));
                };
                SlippageModel::VolumeProportional {
                    bps: slippage_bps,
                    reference_volume,
                }
            }
            other => {
                return Err(BacktestError::Config(format!(
                    "slippage_model must be: none | fixed_bps | volume_proportional (got {other})"
                )))
            }
        };

        let config = Self {
            commission_rate,
            commission_fixed,
            slippage,
            fill_policy: FillPolicy::ImmediateAtNextEvent,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if !self.commission_rate.is_finite() || self.commission_rate < 0.0 {
            return Err(BacktestError::Config(
                "commission_rate must be finite and >= 0".to_string(),
            ));
        }
        if !self.commission_fixed.is_finite() || self.commission_fixed < 0.0 {
            return Err(BacktestError::Config(
                "commission_fixed must be finite and >= 0".to_string(),
            ));
        }
        match self.slippage {
            SlippageModel::None => {}
            SlippageModel::FixedBps { bps } => check_bps(bps)?,
            SlippageModel::VolumeProportional {
                bps,
                reference_volume,
            } => {
                check_bps(bps)?;
                if !reference_volume.is_finite() || reference_volume <= 0.0 {
                    return Err(BacktestError::Config(
                        "reference_volume must be finite and > 0".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn slippage_model_name(&self) -> &'static str {
        match self.slippage {
            SlippageModel::None => "none",
            SlippageModel::FixedBps { .. } => "fixed_bps",
            SlippageModel::VolumeProportional { .. } => "volume_proportional",
        }
    }

    pub fn effective_slippage_bps(&self, quantity: f64, event_volume: Option<f64>) -> f64 {
        match self.slippage {
            SlippageModel::None => 0.0,
            SlippageModel::FixedBps { bps } => bps,
            SlippageModel::VolumeProportional {
                bps,
                reference_volume,
            } => match event_volume {
                Some(volume) if volume > 0.0 => bps * quantity / reference_volume,
                _ => bps,
            },
        }
    }

    /// Event price moved against the trader by the slippage model.
    pub fn fill_price(
        &self,
        side: Side,
        reference_price: f64,
        quantity: f64,
        event_volume: Option<f64>,
    ) -> f64 {
        let bps = self.effective_slippage_bps(quantity, event_volume);
        reference_price * (1.0 + side.sign() * bps / BPS)
    }

    pub fn commission(&self, quantity: f64, price: f64) -> f64 {
        self.commission_fixed + self.commission_rate * (quantity * price).abs()
    }
}

fn check_bps(bps: f64) -> Result<(), BacktestError> {
    if !bps.is_finite() || bps < 0.0 {
        return Err(BacktestError::Config(
            "slippage_bps must be finite and >= 0".to_string(),
        ));
    }
    Ok(())
}
