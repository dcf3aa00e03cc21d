//! Stacked convolutional LSTM.
//!
//! Chains [`ConvLstmCell`]s over a `[batch, time, channels, width]` sequence.
//! Each layer is unrolled over every timestep before the next layer begins;
//! layer *i*'s stacked output sequence is layer *i+1*'s input sequence.

use candle_core::{IndexOp, Tensor};
use candle_nn::VarBuilder;

use crate::cell::ConvLstmCell;
use crate::config::{LayerParam, MixerKind};
use crate::error::{GraincastError, GraincastResult};

/// Per-layer hidden/cell state pair.
pub type LayerState = (Tensor, Tensor);

/// A stack of convolutional LSTM cells.
pub struct ConvLstm {
    cells: Vec<ConvLstmCell>,
    return_all_layers: bool,
}

impl ConvLstm {
    /// Create a stack of `num_layers` cells.
    ///
    /// `hidden_dim` and `kernel_size` are broadcast to every layer when
    /// uniform; explicit per-layer lists must have exactly `num_layers`
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on a per-layer list length mismatch. The
    /// check happens here, never at forward time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_dim: usize,
        hidden_dim: &LayerParam,
        kernel_size: &LayerParam,
        num_layers: usize,
        bias: bool,
        kind: MixerKind,
        return_all_layers: bool,
        vb: VarBuilder,
    ) -> GraincastResult<Self> {
        let hidden_dims = hidden_dim.resolve(num_layers)?;
        let kernel_sizes = kernel_size.resolve(num_layers)?;

        let mut cells = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let layer_input = if i == 0 { input_dim } else { hidden_dims[i - 1] };
            cells.push(ConvLstmCell::new(
                layer_input,
                hidden_dims[i],
                kernel_sizes[i],
                bias,
                kind,
                vb.pp(format!("cells.{i}")),
            )?);
        }

        Ok(Self {
            cells,
            return_all_layers,
        })
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    /// Zero-filled initial state for every layer.
    pub fn init_state(
        &self,
        batch: usize,
        width: usize,
        device: &candle_core::Device,
    ) -> GraincastResult<Vec<LayerState>> {
        self.cells
            .iter()
            .map(|cell| Ok(cell.init_state(batch, width, device)?))
            .collect()
    }

    /// Unroll the stack over an input sequence.
    ///
    /// # Arguments
    ///
    /// * `input` - Sequence `[batch, time, channels, width]`
    /// * `active` - Optional score modulation handed to every cell step
    /// * `state` - Per-layer initial `(h, c)`; `None` zero-initializes
    ///
    /// # Returns
    ///
    /// Per-layer output sequences `[batch, time, hidden, width]` and final
    /// `(h, c)` pairs. With `return_all_layers` off, only the last layer's
    /// entries are returned (each vector has length 1).
    pub fn forward(
        &self,
        input: &Tensor,
        active: Option<&Tensor>,
        state: Option<Vec<LayerState>>,
    ) -> GraincastResult<(Vec<Tensor>, Vec<LayerState>)> {
        let (batch, seq_len, _channels, width) = input.dims4()?;

        let state = match state {
            Some(s) => {
                if s.len() != self.cells.len() {
                    return Err(GraincastError::shape_mismatch(
                        format!("{} layer states", self.cells.len()),
                        format!("{}", s.len()),
                    ));
                }
                s
            }
            None => self.init_state(batch, width, input.device())?,
        };

        let mut layer_outputs = Vec::with_capacity(self.cells.len());
        let mut last_states = Vec::with_capacity(self.cells.len());
        let mut layer_input = input.clone();

        for (cell, (mut h, mut c)) in self.cells.iter().zip(state) {
            let mut outputs = Vec::with_capacity(seq_len);
            for t in 0..seq_len {
                let frame = layer_input.i((.., t, .., ..))?;
                let (h_next, c_next) = cell.forward(&frame, active, (&h, &c))?;
                h = h_next;
                c = c_next;
                outputs.push(h.clone());
            }
            let stacked = Tensor::stack(&outputs, 1)?;
            layer_input = stacked.clone();
            layer_outputs.push(stacked);
            last_states.push((h, c));
        }

        if !self.return_all_layers {
            let keep = layer_outputs.len() - 1;
            layer_outputs.drain(..keep);
            last_states.drain(..keep);
        }

        Ok((layer_outputs, last_states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn stack(
        hidden: LayerParam,
        kernel: LayerParam,
        num_layers: usize,
        return_all: bool,
        device: &Device,
    ) -> GraincastResult<(VarMap, ConvLstm)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, device);
        let lstm = ConvLstm::new(
            8,
            &hidden,
            &kernel,
            num_layers,
            true,
            MixerKind::Conv,
            return_all,
            vb,
        )?;
        Ok((varmap, lstm))
    }

    #[test]
    fn test_forward_shapes() {
        let device = Device::Cpu;
        let (_varmap, lstm) = stack(
            LayerParam::Uniform(4),
            LayerParam::Uniform(3),
            2,
            true,
            &device,
        )
        .unwrap();

        let input = Tensor::randn(0.0f64, 1.0, (2, 3, 8, 10), &device).unwrap();
        let (outputs, states) = lstm.forward(&input, None, None).unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(states.len(), 2);
        for output in &outputs {
            assert_eq!(output.dims(), &[2, 3, 4, 10]);
        }
        for (h, c) in &states {
            assert_eq!(h.dims(), &[2, 4, 10]);
            assert_eq!(c.dims(), &[2, 4, 10]);
        }
    }

    #[test]
    fn test_last_layer_only() {
        let device = Device::Cpu;
        let (_varmap, lstm) = stack(
            LayerParam::Uniform(4),
            LayerParam::Uniform(3),
            3,
            false,
            &device,
        )
        .unwrap();

        let input = Tensor::randn(0.0f64, 1.0, (1, 2, 8, 6), &device).unwrap();
        let (outputs, states) = lstm.forward(&input, None, None).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn test_per_layer_hidden_dims() {
        let device = Device::Cpu;
        let (_varmap, lstm) = stack(
            LayerParam::PerLayer(vec![8, 4]),
            LayerParam::Uniform(3),
            2,
            true,
            &device,
        )
        .unwrap();

        let input = Tensor::randn(0.0f64, 1.0, (2, 3, 8, 10), &device).unwrap();
        let (outputs, _) = lstm.forward(&input, None, None).unwrap();
        assert_eq!(outputs[0].dims(), &[2, 3, 8, 10]);
        assert_eq!(outputs[1].dims(), &[2, 3, 4, 10]);
    }

    #[test]
    fn test_list_length_mismatch_fails_eagerly() {
        let device = Device::Cpu;
        let result = stack(
            LayerParam::PerLayer(vec![8, 4, 2]),
            LayerParam::Uniform(3),
            2,
            true,
            &device,
        );
        assert!(matches!(
            result,
            Err(GraincastError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_none_state_matches_explicit_zeros() {
        let device = Device::Cpu;
        let (_varmap, lstm) = stack(
            LayerParam::Uniform(4),
            LayerParam::Uniform(3),
            2,
            true,
            &device,
        )
        .unwrap();

        let input = Tensor::randn(0.0f64, 1.0, (2, 3, 8, 10), &device).unwrap();
        let zeros = lstm.init_state(2, 10, &device).unwrap();

        let (from_none, _) = lstm.forward(&input, None, None).unwrap();
        let (from_zeros, _) = lstm.forward(&input, None, Some(zeros)).unwrap();

        for (a, b) in from_none.iter().zip(&from_zeros) {
            let diff = (a - b)
                .unwrap()
                .abs()
                .unwrap()
                .sum_all()
                .unwrap()
                .to_scalar::<f64>()
                .unwrap();
            assert_eq!(diff, 0.0);
        }
    }

    #[test]
    fn test_state_count_mismatch() {
        let device = Device::Cpu;
        let (_varmap, lstm) = stack(
            LayerParam::Uniform(4),
            LayerParam::Uniform(3),
            2,
            true,
            &device,
        )
        .unwrap();

        let input = Tensor::randn(0.0f64, 1.0, (1, 2, 8, 6), &device).unwrap();
        let short = lstm.init_state(1, 6, &device).unwrap()[..1].to_vec();
        assert!(lstm.forward(&input, None, Some(short)).is_err());
    }
}
