//! Convolutional-recurrent forecaster for 1-D solidification fraction fields
//!
//! This crate implements a stacked convolutional LSTM with learned
//! cell-state gate corrections, used autoregressively to forecast the
//! evolution of a normalized fraction field together with incremental
//! geometric quantities and a scalar growth rate:
//!
//! - Recurrent cells whose gate pre-activations come from a pluggable
//!   channel mixer (1-D convolution or window attention)
//! - An encoder-decoder rollout (warm start) and a stateless decoder-only
//!   rollout (cold start), unified in one [`Forecaster`]
//! - A mixed-radix hyperparameter grid mapping an integer model id to a
//!   full training assignment
//!
//! All tensors are double precision; candle supplies the tensor engine and
//! parameter registry.
//!
//! # Example
//!
//! ```no_run
//! use graincast_rs::{Forecaster, GraincastConfig};
//! use candle_core::{Device, Tensor};
//!
//! let config = GraincastConfig::default();
//! let device = Device::Cpu;
//! let model = Forecaster::warm_start(&config, &device).unwrap();
//!
//! let seed = Tensor::rand(
//!     0.1f64,
//!     1.0,
//!     (4, 3, config.feature_dim, config.width),
//!     &device,
//! )
//! .unwrap();
//! let (outputs, fractions) = model.forward(&seed, 1.0).unwrap();
//! assert_eq!(outputs.dims()[1], config.out_win);
//! assert_eq!(fractions.dims()[2], config.width);
//! ```

pub mod cell;
pub mod config;
pub mod error;
pub mod forecast;
pub mod grid;
pub mod mixer;
pub mod stack;

pub use cell::ConvLstmCell;
pub use config::{GraincastConfig, LayerParam, MixerKind};
pub use error::{GraincastError, GraincastResult};
pub use forecast::{ForecastMode, Forecaster};
pub use grid::{regressor, HyperGrid, HyperParams};
pub use mixer::{AttentionMixer, ChannelMixer};
pub use stack::{ConvLstm, LayerState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{GraincastConfig, LayerParam, MixerKind};
    pub use crate::error::{GraincastError, GraincastResult};
    pub use crate::forecast::{ForecastMode, Forecaster};
    pub use crate::grid::{regressor, HyperGrid, HyperParams};
    pub use crate::stack::ConvLstm;
}
