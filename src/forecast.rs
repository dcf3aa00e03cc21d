//! Autoregressive forecaster over the fraction field.
//!
//! Drives a decoder [`ConvLstm`] in a closed feedback loop: each step's
//! physical outputs are projected from the hidden state and reassembled
//! into the next step's input frame. One struct covers both operating
//! modes; they differ only in the presence of an encoder stage and the
//! rollout length:
//!
//! - [`ForecastMode::WarmStart`]: an encoder pass over the whole seed
//!   sequence produces the decoder's initial state, the decoder carries
//!   state across all `out_win` steps.
//! - [`ForecastMode::ColdStart`]: no encoder; the decoder state is
//!   re-zeroed on every one of the `out_win - 1` steps.
//!
//! Frame channel layout (positions 0..feature_dim): fraction field,
//! fraction delta, area delta, growth rate broadcast across the width,
//! auxiliary channels, and a trailing time channel advanced by `dt` per
//! step. The reassembly produces exactly this layout, which the decoder
//! consumes on the next iteration; the contract is structural, not checked
//! at runtime.

use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use tracing::debug;

use crate::config::GraincastConfig;
use crate::error::{GraincastError, GraincastResult};
use crate::stack::{ConvLstm, LayerState};

/// Rollout operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastMode {
    /// Encoder-seeded, stateful rollout of `out_win` steps
    WarmStart,
    /// Encoder-free, stateless rollout of `out_win - 1` steps
    ColdStart,
}

/// Autoregressive forecaster producing fraction, area and growth-rate
/// predictions.
///
/// The forward pass returns `(output_seq, frac_seq)`:
///
/// - `output_seq` is `[batch, steps, 2·width + 1]`, each row laid out as
///   fraction delta (width), rectified area delta (width), growth-rate
///   delta (1).
/// - `frac_seq` is `[batch, steps, width]`, the normalized fraction field
///   per step: non-negative with unit L1 mass along the spatial axis.
pub struct Forecaster {
    encoder: Option<ConvLstm>,
    decoder: ConvLstm,
    project_frac: Linear,
    project_area: Linear,
    project_dy: Linear,
    feature_dim: usize,
    hidden_dim: usize,
    width: usize,
    steps: usize,
    dt: f64,
    frac_norm: f64,
    device: Device,
    var_map: VarMap,
}

impl Forecaster {
    /// Create a forecaster with randomly initialized parameters.
    pub fn new(
        config: &GraincastConfig,
        mode: ForecastMode,
        device: &Device,
    ) -> GraincastResult<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F64, device);
        Self::from_varbuilder(config, mode, vb, device, var_map)
    }

    /// Encoder-seeded forecaster rolling `out_win` steps.
    pub fn warm_start(config: &GraincastConfig, device: &Device) -> GraincastResult<Self> {
        Self::new(config, ForecastMode::WarmStart, device)
    }

    /// Stateless forecaster rolling `out_win - 1` steps.
    pub fn cold_start(config: &GraincastConfig, device: &Device) -> GraincastResult<Self> {
        Self::new(config, ForecastMode::ColdStart, device)
    }

    /// Create a forecaster from a `VarBuilder` (for loading weights).
    pub fn from_varbuilder(
        config: &GraincastConfig,
        mode: ForecastMode,
        vb: VarBuilder,
        device: &Device,
        var_map: VarMap,
    ) -> GraincastResult<Self> {
        config.validate()?;
        if mode == ForecastMode::WarmStart && config.encoder_layers != config.decoder_layers {
            return Err(GraincastError::invalid_config(
                "warm start hands the encoder's final state to the decoder; \
                 encoder_layers must equal decoder_layers",
            ));
        }

        let encoder = match mode {
            ForecastMode::WarmStart => Some(ConvLstm::new(
                config.feature_dim,
                &config.hidden_dim,
                &config.kernel_size,
                config.encoder_layers,
                config.bias,
                config.mixer,
                true,
                vb.pp("encoder"),
            )?),
            ForecastMode::ColdStart => None,
        };
        let decoder = ConvLstm::new(
            config.feature_dim,
            &config.hidden_dim,
            &config.kernel_size,
            config.decoder_layers,
            config.bias,
            config.mixer,
            true,
            vb.pp("decoder"),
        )?;

        let hidden_dim = config.decoder_hidden()?;
        let flat = hidden_dim * config.width;
        let project_frac = candle_nn::linear(flat, config.width, vb.pp("project_frac"))?;
        let project_area = candle_nn::linear(flat, config.width, vb.pp("project_area"))?;
        let project_dy = candle_nn::linear(flat, 1, vb.pp("project_dy"))?;

        let steps = match mode {
            ForecastMode::WarmStart => config.out_win,
            ForecastMode::ColdStart => config.out_win - 1,
        };
        debug!(
            ?mode,
            steps,
            encoder_layers = encoder.as_ref().map_or(0, ConvLstm::num_layers),
            decoder_layers = decoder.num_layers(),
            "built forecaster"
        );

        Ok(Self {
            encoder,
            decoder,
            project_frac,
            project_area,
            project_dy,
            feature_dim: config.feature_dim,
            hidden_dim,
            width: config.width,
            steps,
            dt: config.dt,
            frac_norm: config.frac_norm,
            device: device.clone(),
            var_map,
        })
    }

    /// Number of rollout steps this forecaster produces.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run the autoregressive rollout.
    ///
    /// # Arguments
    ///
    /// * `input_seq` - Seed sequence `[batch, time, feature_dim, width]`
    /// * `cl` - Normalization constant dividing the raw fraction head
    ///
    /// # Returns
    ///
    /// `(output_seq [batch, steps, 2·width+1], frac_seq [batch, steps,
    /// width])`. A fraction row whose rectified values are all zero
    /// propagates NaN through the remaining steps rather than raising.
    pub fn forward(&self, input_seq: &Tensor, cl: f64) -> GraincastResult<(Tensor, Tensor)> {
        let (batch, seq_len, channels, width) = input_seq.dims4()?;
        if channels != self.feature_dim || width != self.width {
            return Err(GraincastError::shape_mismatch(
                format!("[_, _, {}, {}]", self.feature_dim, self.width),
                format!("[{batch}, {seq_len}, {channels}, {width}]"),
            ));
        }
        if self.steps == 0 {
            let empty_out =
                Tensor::zeros((batch, 0, 2 * width + 1), DType::F64, &self.device)?;
            let empty_frac = Tensor::zeros((batch, 0, width), DType::F64, &self.device)?;
            return Ok((empty_out, empty_frac));
        }

        // Rollout starts from the last seed frame.
        let mut frame = input_seq.i((.., seq_len - 1, .., ..))?;

        let mut state: Option<Vec<LayerState>> = match &self.encoder {
            Some(encoder) => {
                let (_, encoded) = encoder.forward(input_seq, None, None)?;
                Some(encoded)
            }
            None => None,
        };

        let mut output_rows = Vec::with_capacity(self.steps);
        let mut frac_rows = Vec::with_capacity(self.steps);

        for step in 0..self.steps {
            let (outputs, next_state) =
                self.decoder.forward(&frame.unsqueeze(1)?, None, state.take())?;
            if self.encoder.is_some() {
                state = Some(next_state);
            }

            let last_layer = outputs.last().ok_or_else(|| {
                GraincastError::shape_mismatch("at least one decoder layer output", "none")
            })?;
            let last_time = last_layer
                .i((.., 0, .., ..))?
                .reshape((batch, self.hidden_dim * self.width))?;

            let dy = self.project_dy.forward(&last_time)?.relu()?;
            let darea = self.project_area.forward(&last_time)?;
            let dfrac_raw = (self.project_frac.forward(&last_time)? / cl)?;

            // Rectify against the prior fraction field, then restore unit
            // L1 mass over the spatial axis.
            let prior = frame.i((.., 0, ..))?;
            let frac = (dfrac_raw + &prior)?.relu()?;
            let frac = frac.broadcast_div(&frac.sum_keepdim(D::Minus1)?)?;

            // Normalization-consistent delta.
            let dfrac = ((frac.clone() - &prior)? / self.frac_norm)?;

            output_rows.push(Tensor::cat(&[&dfrac, &darea.relu()?, &dy], 1)?);
            frac_rows.push(frac.clone());
            debug!(step, "rollout step complete");

            // Next frame: predicted channels, untouched auxiliaries, and
            // the time channel advanced by dt.
            let dy_field = dy.unsqueeze(2)?.broadcast_as((batch, 1, self.width))?;
            let time = (frame.narrow(1, self.feature_dim - 1, 1)? + self.dt)?;
            let mut parts = vec![
                frac.unsqueeze(1)?,
                dfrac.unsqueeze(1)?,
                darea.unsqueeze(1)?,
                dy_field,
            ];
            if self.feature_dim > 5 {
                parts.push(frame.narrow(1, 4, self.feature_dim - 5)?);
            }
            parts.push(time);
            frame = Tensor::cat(&parts, 1)?;
        }

        let output_seq = Tensor::stack(&output_rows, 1)?;
        let frac_seq = Tensor::stack(&frac_rows, 1)?;
        Ok((output_seq, frac_seq))
    }

    /// Save parameters to a safetensors file.
    pub fn save(&self, path: &std::path::Path) -> GraincastResult<()> {
        self.var_map.save(path)?;
        Ok(())
    }

    /// Create a forecaster and load its parameters from a safetensors
    /// file. The configuration and mode must match the saved model.
    pub fn load(
        config: &GraincastConfig,
        mode: ForecastMode,
        path: &std::path::Path,
        device: &Device,
    ) -> GraincastResult<Self> {
        let mut model = Self::new(config, mode, device)?;
        model.var_map.load(path)?;
        Ok(model)
    }
}
