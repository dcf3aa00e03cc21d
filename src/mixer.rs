//! Channel-mixing operators for the recurrent cells.
//!
//! A mixer maps `[batch, in_channels, width]` to `[batch, out_channels,
//! width]`, mixing channels over a fixed odd kernel span with same padding.
//! Two implementations share that contract:
//!
//! - [`ChannelMixer::Conv`]: a plain 1-D convolution.
//! - [`ChannelMixer::Attention`]: window attention — the fixed kernel tap
//!   weights of a convolution are replaced by data-dependent, softmax
//!   normalized scores over the same span, followed by a position-shared
//!   channel projection.

use candle_core::{Result, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Module, VarBuilder};

use crate::config::MixerKind;

/// Learned channel-mixing operator, `[B, Cin, W] -> [B, Cout, W]`.
pub enum ChannelMixer {
    /// Convolution with same padding
    Conv(Conv1d),
    /// Window attention over the kernel span
    Attention(AttentionMixer),
}

impl ChannelMixer {
    /// Create a mixer of the requested kind.
    ///
    /// `kernel_size` must be odd so that same padding preserves the width.
    pub fn new(
        kind: MixerKind,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        match kind {
            MixerKind::Conv => {
                let cfg = Conv1dConfig {
                    padding: (kernel_size - 1) / 2,
                    ..Default::default()
                };
                let conv = if bias {
                    candle_nn::conv1d(in_channels, out_channels, kernel_size, cfg, vb)?
                } else {
                    candle_nn::conv1d_no_bias(in_channels, out_channels, kernel_size, cfg, vb)?
                };
                Ok(Self::Conv(conv))
            }
            MixerKind::Attention => Ok(Self::Attention(AttentionMixer::new(
                in_channels,
                out_channels,
                kernel_size,
                bias,
                vb,
            )?)),
        }
    }

    /// Declared output channel count.
    pub fn out_channels(&self) -> usize {
        match self {
            Self::Conv(conv) => conv.weight().dim(0).unwrap_or(0),
            Self::Attention(attn) => attn.out_channels(),
        }
    }

    /// Forward pass. `active` modulates the attention scores and is ignored
    /// by the convolutional mixer, which has no score path.
    pub fn forward(&self, x: &Tensor, active: Option<&Tensor>) -> Result<Tensor> {
        match self {
            Self::Conv(conv) => conv.forward(x),
            Self::Attention(attn) => attn.forward(x, active),
        }
    }
}

/// Window attention over a fixed odd kernel span.
///
/// Per position, a score head produces one logit per tap of the window; the
/// softmax over taps forms a convex combination of the zero-padded shifted
/// inputs, and a position-shared linear map mixes the combined channels to
/// the output count. An optional `active` tensor, broadcastable to
/// `[batch, kernel_size, width]`, is added to the logits before the softmax.
pub struct AttentionMixer {
    score: Conv1d,
    value: Conv1d,
    kernel_size: usize,
    padding: usize,
}

impl AttentionMixer {
    /// Create a window-attention mixer.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let score = candle_nn::conv1d_no_bias(
            in_channels,
            kernel_size,
            1,
            Conv1dConfig::default(),
            vb.pp("score"),
        )?;
        let value = if bias {
            candle_nn::conv1d(
                in_channels,
                out_channels,
                1,
                Conv1dConfig::default(),
                vb.pp("value"),
            )?
        } else {
            candle_nn::conv1d_no_bias(
                in_channels,
                out_channels,
                1,
                Conv1dConfig::default(),
                vb.pp("value"),
            )?
        };
        Ok(Self {
            score,
            value,
            kernel_size,
            padding: (kernel_size - 1) / 2,
        })
    }

    /// Declared output channel count.
    pub fn out_channels(&self) -> usize {
        self.value.weight().dim(0).unwrap_or(0)
    }

    /// Forward pass, `[B, Cin, W] -> [B, Cout, W]`.
    pub fn forward(&self, x: &Tensor, active: Option<&Tensor>) -> Result<Tensor> {
        let (_batch, _channels, width) = x.dims3()?;

        let scores = self.score.forward(x)?;
        let scores = match active {
            Some(a) => scores.broadcast_add(a)?,
            None => scores,
        };
        let attn = candle_nn::ops::softmax(&scores, 1)?;

        // Convex combination of the shifted inputs, one tap at a time.
        let padded = x.pad_with_zeros(D::Minus1, self.padding, self.padding)?;
        let mut mixed = padded
            .narrow(D::Minus1, 0, width)?
            .broadcast_mul(&attn.narrow(1, 0, 1)?)?;
        for tap in 1..self.kernel_size {
            let shifted = padded.narrow(D::Minus1, tap, width)?;
            mixed = (mixed + shifted.broadcast_mul(&attn.narrow(1, tap, 1)?)?)?;
        }

        self.value.forward(&mixed)
    }
}
