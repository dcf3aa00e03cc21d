//! Model configuration for the graincast forecaster.
//!
//! Every field the model constructors consume is enumerated here with its
//! type and valid range; nothing is read from ambient state. Configurations
//! can be loaded from and saved to TOML files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GraincastError, GraincastResult};

/// Which channel-mixing operator the recurrent cells use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MixerKind {
    /// Plain 1-D convolution with same padding
    Conv,
    /// Window attention over the kernel span (default)
    #[default]
    Attention,
}

/// A per-cell parameter given either as one value for every layer or as an
/// explicit per-layer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerParam {
    /// One value broadcast to every layer
    Uniform(usize),
    /// One value per layer; length must equal the layer count
    PerLayer(Vec<usize>),
}

impl LayerParam {
    /// Expand to a per-layer vector of length `num_layers`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if an explicit list's length does not match
    /// `num_layers`.
    pub fn resolve(&self, num_layers: usize) -> GraincastResult<Vec<usize>> {
        match self {
            Self::Uniform(v) => Ok(vec![*v; num_layers]),
            Self::PerLayer(vs) if vs.len() == num_layers => Ok(vs.clone()),
            Self::PerLayer(vs) => Err(GraincastError::invalid_config(format!(
                "per-layer list has {} entries but there are {} layers",
                vs.len(),
                num_layers
            ))),
        }
    }
}

impl From<usize> for LayerParam {
    fn from(v: usize) -> Self {
        Self::Uniform(v)
    }
}

/// Configuration for the graincast forecaster.
///
/// The input sequence has shape `[batch, time, feature_dim, width]` with a
/// fixed channel layout: fraction field, fraction delta, area delta, growth
/// rate, auxiliary channels, and a trailing time channel. The forecaster
/// reassembles frames with exactly this layout at every rollout step, so
/// `feature_dim` must leave room for the five structural channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraincastConfig {
    /// Number of input channels
    pub feature_dim: usize,
    /// Hidden channel count, per layer or broadcast
    pub hidden_dim: LayerParam,
    /// Number of encoder cells (warm-start only)
    pub encoder_layers: usize,
    /// Number of decoder cells
    pub decoder_layers: usize,
    /// Spatial width of the fraction field
    pub width: usize,
    /// Rollout length requested from the forecaster
    pub out_win: usize,
    /// Mixer kernel span, per layer or broadcast; must be odd
    pub kernel_size: LayerParam,
    /// Additive bias in the mixing operator
    pub bias: bool,
    /// Fixed timestep increment applied to the time channel per rollout step
    pub dt: f64,
    /// Normalization scale for the recomputed fraction delta
    pub frac_norm: f64,
    /// Channel-mixing operator
    pub mixer: MixerKind,
}

impl Default for GraincastConfig {
    fn default() -> Self {
        Self {
            feature_dim: 8,
            hidden_dim: LayerParam::Uniform(64),
            encoder_layers: 2,
            decoder_layers: 2,
            width: 50,
            out_win: 5,
            kernel_size: LayerParam::Uniform(3),
            bias: true,
            dt: 0.05,
            frac_norm: 1.0,
            mixer: MixerKind::Attention,
        }
    }
}

impl GraincastConfig {
    /// Minimal configuration for unit tests.
    pub fn test() -> Self {
        Self {
            feature_dim: 8,
            hidden_dim: LayerParam::Uniform(4),
            encoder_layers: 1,
            decoder_layers: 1,
            width: 10,
            out_win: 2,
            kernel_size: LayerParam::Uniform(3),
            bias: true,
            dt: 0.05,
            frac_norm: 1.0,
            mixer: MixerKind::Conv,
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> GraincastResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> GraincastResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// All checks are hard failures; an invalid configuration is never
    /// partially usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> GraincastResult<()> {
        if self.feature_dim < 5 {
            return Err(GraincastError::invalid_config(
                "feature_dim must be >= 5: frame reassembly needs fraction, \
                 fraction-delta, area-delta, growth-rate and time channels",
            ));
        }
        if self.width == 0 {
            return Err(GraincastError::invalid_config("width must be > 0"));
        }
        if self.out_win == 0 {
            return Err(GraincastError::invalid_config("out_win must be >= 1"));
        }
        if self.encoder_layers == 0 || self.decoder_layers == 0 {
            return Err(GraincastError::invalid_config(
                "encoder_layers and decoder_layers must be >= 1",
            ));
        }
        if self.frac_norm <= 0.0 {
            return Err(GraincastError::invalid_config("frac_norm must be > 0"));
        }
        for layers in [self.encoder_layers, self.decoder_layers] {
            for h in self.hidden_dim.resolve(layers)? {
                if h == 0 {
                    return Err(GraincastError::invalid_config("hidden_dim must be > 0"));
                }
            }
            for k in self.kernel_size.resolve(layers)? {
                if k == 0 || k % 2 == 0 {
                    return Err(GraincastError::invalid_config(format!(
                        "kernel_size must be odd for same padding, got {k}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Hidden channel count of the last decoder layer, which feeds the
    /// projection heads.
    pub fn decoder_hidden(&self) -> GraincastResult<usize> {
        let dims = self.hidden_dim.resolve(self.decoder_layers)?;
        dims.last().copied().ok_or_else(|| {
            GraincastError::invalid_config("decoder_layers must be >= 1")
        })
    }
}
