//! Convolutional LSTM cell with cell-state gate corrections.
//!
//! One recurrent step over a `[batch, channels, width]` field. The four gate
//! pre-activations come from a channel mixer applied to the concatenated
//! input and hidden state; the input, forget and output gates additionally
//! receive a learned position-shared channel map of the cell state:
//!
//! - i = `σ(cc_i + W_ci·c)`, f = `σ(cc_f + W_cf·c)`
//! - `c_next` = f⊙c + i⊙tanh(`cc_g`)
//! - o = `σ(cc_o + W_co·c_next)`, `h_next` = o⊙tanh(`c_next`)
//!
//! The output gate's correction reads the updated cell state `c_next`, not
//! the incoming one; the asymmetry is part of the update rule.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::config::MixerKind;
use crate::mixer::ChannelMixer;

/// One convolutional LSTM cell.
///
/// The three correction matrices are square `[hidden, hidden]` maps shared
/// across spatial positions; they mix channels only, never positions. All
/// parameters are f64 and initialized U(-1/√hidden, 1/√hidden).
pub struct ConvLstmCell {
    mixer: ChannelMixer,
    w_ci: Tensor,
    w_cf: Tensor,
    w_co: Tensor,
    input_dim: usize,
    hidden_dim: usize,
}

impl ConvLstmCell {
    /// Create a cell.
    ///
    /// # Arguments
    ///
    /// * `input_dim` - Number of input channels
    /// * `hidden_dim` - Number of hidden/cell state channels
    /// * `kernel_size` - Mixer kernel span (odd)
    /// * `bias` - Additive bias in the mixing operator
    /// * `kind` - Which channel mixer to use
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        kernel_size: usize,
        bias: bool,
        kind: MixerKind,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mixer = ChannelMixer::new(
            kind,
            input_dim + hidden_dim,
            4 * hidden_dim,
            kernel_size,
            bias,
            vb.pp("mixer"),
        )?;
        if mixer.out_channels() != 4 * hidden_dim {
            return Err(candle_core::Error::Msg(format!(
                "mixer produces {} channels, gate split needs {}",
                mixer.out_channels(),
                4 * hidden_dim
            )));
        }

        let stdv = 1.0 / (hidden_dim as f64).sqrt();
        let init = Init::Uniform {
            lo: -stdv,
            up: stdv,
        };
        let w_ci = vb.get_with_hints((hidden_dim, hidden_dim), "w_ci", init)?;
        let w_cf = vb.get_with_hints((hidden_dim, hidden_dim), "w_cf", init)?;
        let w_co = vb.get_with_hints((hidden_dim, hidden_dim), "w_co", init)?;

        Ok(Self {
            mixer,
            w_ci,
            w_cf,
            w_co,
            input_dim,
            hidden_dim,
        })
    }

    /// Number of input channels.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of hidden channels.
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Position-shared channel map: `out[b,o,w] = Σ_i m[o,i]·x[b,i,w]`.
    fn channel_map(m: &Tensor, x: &Tensor) -> Result<Tensor> {
        m.unsqueeze(0)?.broadcast_matmul(x)
    }

    /// One recurrent step.
    ///
    /// # Arguments
    ///
    /// * `input` - Input slice `[batch, input_dim, width]`
    /// * `active` - Optional score modulation handed through to the mixer
    /// * `state` - Current `(h, c)`, each `[batch, hidden_dim, width]`
    ///
    /// # Returns
    ///
    /// Next `(h, c)` with shapes identical to the incoming state.
    pub fn forward(
        &self,
        input: &Tensor,
        active: Option<&Tensor>,
        state: (&Tensor, &Tensor),
    ) -> Result<(Tensor, Tensor)> {
        let (h_cur, c_cur) = state;

        let combined = Tensor::cat(&[input, h_cur], 1)?;
        let gates = self.mixer.forward(&combined, active)?;

        let h = self.hidden_dim;
        let cc_i = gates.narrow(1, 0, h)?;
        let cc_f = gates.narrow(1, h, h)?;
        let cc_o = gates.narrow(1, 2 * h, h)?;
        let cc_g = gates.narrow(1, 3 * h, h)?;

        let sc_i = Self::channel_map(&self.w_ci, c_cur)?;
        let sc_f = Self::channel_map(&self.w_cf, c_cur)?;

        let i = candle_nn::ops::sigmoid(&(cc_i + sc_i)?)?;
        let f = candle_nn::ops::sigmoid(&(cc_f + sc_f)?)?;
        let c_next = ((f * c_cur)? + (i * cc_g.tanh()?)?)?;

        // the output gate reads the cell state it is about to expose
        let sc_o = Self::channel_map(&self.w_co, &c_next)?;
        let o = candle_nn::ops::sigmoid(&(cc_o + sc_o)?)?;
        let h_next = (o * c_next.tanh()?)?;

        Ok((h_next, c_next))
    }

    /// Zero-filled `(h, c)` pair for the given batch and width.
    pub fn init_state(
        &self,
        batch: usize,
        width: usize,
        device: &Device,
    ) -> Result<(Tensor, Tensor)> {
        let shape = (batch, self.hidden_dim, width);
        Ok((
            Tensor::zeros(shape, DType::F64, device)?,
            Tensor::zeros(shape, DType::F64, device)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn test_cell(
        kind: MixerKind,
        input_dim: usize,
        hidden_dim: usize,
        device: &Device,
    ) -> (VarMap, ConvLstmCell) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, device);
        let cell = ConvLstmCell::new(input_dim, hidden_dim, 3, true, kind, vb).unwrap();
        (varmap, cell)
    }

    #[test]
    fn test_cell_creation() {
        let device = Device::Cpu;
        let (_varmap, cell) = test_cell(MixerKind::Conv, 8, 4, &device);
        assert_eq!(cell.input_dim(), 8);
        assert_eq!(cell.hidden_dim(), 4);
        assert_eq!(cell.w_ci.dims(), &[4, 4]);
        assert_eq!(cell.w_cf.dims(), &[4, 4]);
        assert_eq!(cell.w_co.dims(), &[4, 4]);
    }

    #[test]
    fn test_uniform_initialization_range() {
        let device = Device::Cpu;
        let (_varmap, cell) = test_cell(MixerKind::Conv, 8, 4, &device);
        let stdv = 1.0 / 2.0;
        let values: Vec<f64> = cell.w_ci.flatten_all().unwrap().to_vec1().unwrap();
        for v in values {
            assert!(v.abs() <= stdv);
        }
    }

    #[test]
    fn test_step_preserves_state_shape() {
        let device = Device::Cpu;
        for kind in [MixerKind::Conv, MixerKind::Attention] {
            let (_varmap, cell) = test_cell(kind, 8, 4, &device);
            let (h, c) = cell.init_state(2, 10, &device).unwrap();
            let input = Tensor::randn(0.0f64, 1.0, (2, 8, 10), &device).unwrap();

            let (h_next, c_next) = cell.forward(&input, None, (&h, &c)).unwrap();
            assert_eq!(h_next.dims(), h.dims());
            assert_eq!(c_next.dims(), c.dims());
        }
    }

    #[test]
    fn test_step_determinism() {
        let device = Device::Cpu;
        let (_varmap, cell) = test_cell(MixerKind::Conv, 8, 4, &device);
        let (h, c) = cell.init_state(1, 6, &device).unwrap();
        let input = Tensor::randn(0.0f64, 1.0, (1, 8, 6), &device).unwrap();

        let (h1, _) = cell.forward(&input, None, (&h, &c)).unwrap();
        let (h2, _) = cell.forward(&input, None, (&h, &c)).unwrap();
        let diff = (&h1 - &h2)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f64>()
            .unwrap();
        assert_eq!(diff, 0.0);
    }

    /// Pins every parameter and checks the output gate against a value
    /// hand-computed from the updated cell state. With all mixer weights
    /// zero, gates reduce to sigmoid(0) = 0.5 and the candidate vanishes,
    /// so c_next = 0.5·c. With w_co = [[2]] the correct output is
    /// σ(2·0.5·c)·tanh(0.5·c); reading the stale cell state would give
    /// σ(2·c)·tanh(0.5·c) instead.
    #[test]
    fn test_output_gate_reads_updated_cell_state() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &device);
        let cell = ConvLstmCell::new(1, 1, 3, true, MixerKind::Conv, vb).unwrap();

        {
            let data = varmap.data().lock().unwrap();
            for (name, var) in data.iter() {
                let zeros = var.as_tensor().zeros_like().unwrap();
                var.set(&zeros).unwrap();
                if name == "w_co" {
                    let two = Tensor::from_vec(vec![2.0f64], (1, 1), &device).unwrap();
                    var.set(&two).unwrap();
                }
            }
        }

        let input = Tensor::zeros((1, 1, 1), DType::F64, &device).unwrap();
        let h = Tensor::zeros((1, 1, 1), DType::F64, &device).unwrap();
        let c = Tensor::from_vec(vec![1.0f64], (1, 1, 1), &device).unwrap();

        let (h_next, c_next) = cell.forward(&input, None, (&h, &c)).unwrap();

        let c_val = c_next.flatten_all().unwrap().to_vec1::<f64>().unwrap()[0];
        assert!((c_val - 0.5).abs() < 1e-12);

        let sigmoid = |x: f64| 1.0 / (1.0 + (-x).exp());
        let expected = sigmoid(2.0 * 0.5) * 0.5f64.tanh();
        let stale = sigmoid(2.0 * 1.0) * 0.5f64.tanh();

        let h_val = h_next.flatten_all().unwrap().to_vec1::<f64>().unwrap()[0];
        assert!(
            (h_val - expected).abs() < 1e-12,
            "expected {expected}, got {h_val}"
        );
        assert!((h_val - stale).abs() > 1e-3);
    }
}
