//! Hyperparameter grid search configuration.
//!
//! A grid is an ordered list of axes; an integer model id indexes the
//! cartesian product of their values through mixed-radix decoding, so many
//! training runs can be driven from a single integer. Assignments are
//! immutable after construction and consumed read-only by the model
//! constructors.

use serde::{Deserialize, Serialize};

use crate::config::{GraincastConfig, LayerParam, MixerKind};

/// One hyperparameter assignment.
///
/// The statically-typed record of everything a training run needs; every
/// field is explicit, nothing is merged in dynamically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    /// Learning rate
    pub lr: f64,
    /// Hidden channel count
    pub layer_size: usize,
    /// Training batch size
    pub batch_size: usize,
    /// Learning-rate decay interval in epochs
    pub decay_step: usize,
    /// L2 weight decay
    pub weight_decay: f64,
    /// Encoder and decoder layer counts
    pub layers: (usize, usize),
    /// Mixer kernel span
    pub kernel_size: usize,
    /// Training epochs
    pub epoch: usize,
    /// Additive bias in the mixing operator
    pub bias: bool,
    /// Number of frames per trajectory
    pub frames: usize,
    /// Sliding-window stride over the frames
    pub window: usize,
    /// Rollout length
    pub out_win: usize,
    /// Input channel count
    pub feature_dim: usize,
    /// Spatial width of the fraction field
    pub g_base: usize,
    /// Timestep increment between frames
    pub dt: f64,
    /// Ensemble member ids trained under this assignment
    pub model_list: Vec<usize>,
}

impl HyperParams {
    /// Model configuration for this assignment. The fraction-delta
    /// normalization scale is not a grid axis and must be supplied by the
    /// caller.
    pub fn model_config(&self, frac_norm: f64) -> GraincastConfig {
        GraincastConfig {
            feature_dim: self.feature_dim,
            hidden_dim: LayerParam::Uniform(self.layer_size),
            encoder_layers: self.layers.0,
            decoder_layers: self.layers.1,
            width: self.g_base,
            out_win: self.out_win,
            kernel_size: LayerParam::Uniform(self.kernel_size),
            bias: self.bias,
            dt: self.dt,
            frac_norm,
            mixer: MixerKind::Attention,
        }
    }
}

/// Ordered axis sizes of a hyperparameter grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperGrid {
    axis_lens: Vec<usize>,
}

impl HyperGrid {
    /// Create a grid from the per-axis value counts, in axis order.
    pub fn new(axis_lens: &[usize]) -> Self {
        Self {
            axis_lens: axis_lens.to_vec(),
        }
    }

    /// Total number of distinct assignments.
    pub fn cardinality(&self) -> usize {
        self.axis_lens.iter().product()
    }

    /// Decode a model id into one index per axis.
    ///
    /// Axis *j* advances once every `Π_{i<j} len_i` consecutive ids, so
    /// consecutive ids walk the first axis fastest. Ids beyond the grid's
    /// cardinality wrap around.
    pub fn decode(&self, model_id: usize) -> Vec<usize> {
        let mut prev_dim = 1;
        self.axis_lens
            .iter()
            .map(|&len| {
                let cur_dim = prev_dim * len;
                let idx = (model_id % cur_dim) / prev_dim;
                prev_dim = cur_dim;
                idx
            })
            .collect()
    }
}

/// Grid for the fraction-field regressor.
///
/// Searches learning rate, hidden size, batch size and decay interval; all
/// other hyperparameters are fixed per assignment.
pub fn regressor(model_id: usize) -> HyperParams {
    const LR: [f64; 3] = [50e-4, 10e-4, 20e-4];
    const LAYER_SIZE: [usize; 3] = [96, 64, 32];
    const BATCH_SIZE: [usize; 4] = [4, 2, 8, 16];
    const DECAY_STEP: [usize; 3] = [10, 5, 20];

    let grid = HyperGrid::new(&[LR.len(), LAYER_SIZE.len(), BATCH_SIZE.len(), DECAY_STEP.len()]);
    let idx = grid.decode(model_id);

    // One solidification step per stored frame, plus the initial state.
    let ct = 1;
    let frames = 20 * ct + 1;

    HyperParams {
        lr: LR[idx[0]],
        layer_size: LAYER_SIZE[idx[1]],
        batch_size: BATCH_SIZE[idx[2]],
        decay_step: DECAY_STEP[idx[3]],
        weight_decay: 0.0,
        layers: (1, 1),
        kernel_size: 3,
        epoch: 50,
        bias: true,
        frames,
        window: 1,
        out_win: 1,
        feature_dim: 8,
        g_base: 50,
        dt: 0.05,
        model_list: vec![0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_walks_first_axis_fastest() {
        let grid = HyperGrid::new(&[3, 2]);
        assert_eq!(grid.decode(0), vec![0, 0]);
        assert_eq!(grid.decode(1), vec![1, 0]);
        assert_eq!(grid.decode(2), vec![2, 0]);
        assert_eq!(grid.decode(3), vec![0, 1]);
        assert_eq!(grid.decode(5), vec![2, 1]);
    }

    #[test]
    fn test_decode_wraps_past_cardinality() {
        let grid = HyperGrid::new(&[3, 2]);
        assert_eq!(grid.cardinality(), 6);
        assert_eq!(grid.decode(6), grid.decode(0));
        assert_eq!(grid.decode(13), grid.decode(1));
    }

    #[test]
    fn test_decode_enumerates_full_product() {
        let grid = HyperGrid::new(&[3, 3, 4, 3]);
        let mut seen = std::collections::HashSet::new();
        for id in 0..grid.cardinality() {
            seen.insert(grid.decode(id));
        }
        assert_eq!(seen.len(), grid.cardinality());
    }

    #[test]
    fn test_regressor_is_deterministic() {
        assert_eq!(regressor(17), regressor(17));
        assert_ne!(regressor(0), regressor(1));
    }

    #[test]
    fn test_regressor_first_assignment() {
        let hp = regressor(0);
        assert_eq!(hp.lr, 50e-4);
        assert_eq!(hp.layer_size, 96);
        assert_eq!(hp.batch_size, 4);
        assert_eq!(hp.decay_step, 10);
        assert_eq!(hp.frames, 21);
        assert_eq!(hp.layers, (1, 1));
    }

    #[test]
    fn test_regressor_axis_order() {
        // id 1 advances lr only; id 3 advances layer_size only.
        let hp = regressor(1);
        assert_eq!(hp.lr, 10e-4);
        assert_eq!(hp.layer_size, 96);

        let hp = regressor(3);
        assert_eq!(hp.lr, 50e-4);
        assert_eq!(hp.layer_size, 64);
    }

    #[test]
    fn test_assignment_builds_valid_model_config() {
        let config = regressor(0).model_config(1.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.width, 50);
    }
}
