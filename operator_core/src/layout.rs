//! Tensor layout conventions.
//!
//! The mixing core only ever sees the canonical channel-first ordering
//! `(channels, s_1, ..., s_N, batch)`. Channel-last inputs
//! `(s_1, ..., s_N, channels, batch)` are permuted in and out around it.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, OperatorResult};

/// Axis ordering of a layer's external tensors.
///
/// Chosen once when the layer is built; layers expose no way to change it
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `(channels, spatial..., batch)`
    #[default]
    ChannelFirst,
    /// `(spatial..., channels, batch)`
    ChannelLast,
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::ChannelFirst => "channel_first",
            Layout::ChannelLast => "channel_last",
        }
    }

    /// Position of the channel axis in a tensor of rank `ndim`.
    pub fn channel_axis(&self, ndim: usize) -> usize {
        match self {
            Layout::ChannelFirst => 0,
            Layout::ChannelLast => ndim.saturating_sub(2),
        }
    }

    /// Axis order taking an external tensor of rank `ndim` to canonical form.
    pub fn canonical_order(&self, ndim: usize) -> Vec<usize> {
        match self {
            Layout::ChannelFirst => (0..ndim).collect(),
            Layout::ChannelLast => {
                let channel = ndim - 2;
                std::iter::once(channel)
                    .chain(0..channel)
                    .chain(std::iter::once(ndim - 1))
                    .collect()
            }
        }
    }

    /// Axis order taking a canonical tensor of rank `ndim` back to this layout.
    pub fn external_order(&self, ndim: usize) -> Vec<usize> {
        match self {
            Layout::ChannelFirst => (0..ndim).collect(),
            Layout::ChannelLast => (1..ndim - 1)
                .chain(std::iter::once(0))
                .chain(std::iter::once(ndim - 1))
                .collect(),
        }
    }

    /// Permutes an external tensor into the canonical channel-first layout.
    pub fn to_canonical<A: Clone>(&self, x: &ArrayD<A>) -> OperatorResult<ArrayD<A>> {
        check_rank(x.ndim(), "layout to_canonical")?;
        Ok(match self {
            Layout::ChannelFirst => x.as_standard_layout().into_owned(),
            Layout::ChannelLast => permute(x, &self.canonical_order(x.ndim())),
        })
    }

    /// Permutes a canonical tensor back into this layout.
    pub fn from_canonical<A: Clone>(&self, x: &ArrayD<A>) -> OperatorResult<ArrayD<A>> {
        check_rank(x.ndim(), "layout from_canonical")?;
        Ok(match self {
            Layout::ChannelFirst => x.as_standard_layout().into_owned(),
            Layout::ChannelLast => permute(x, &self.external_order(x.ndim())),
        })
    }

    /// Channel count of an external tensor.
    pub fn channels<A>(&self, x: &ArrayD<A>) -> usize {
        x.len_of(Axis(self.channel_axis(x.ndim())))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Layout {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "channel_first" | "channels_first" | "permuted" => Ok(Layout::ChannelFirst),
            "channel_last" | "channels_last" | "unpermuted" => Ok(Layout::ChannelLast),
            other => Err(OperatorError::invalid_config(
                "layout",
                other,
                "expected \"channel_first\" or \"channel_last\"",
            )),
        }
    }
}

fn check_rank(ndim: usize, context: &str) -> OperatorResult<()> {
    if ndim < 2 {
        return Err(OperatorError::shape_mismatch(
            context,
            "rank >= 2 (channels and batch axes)",
            format!("rank {ndim}"),
        ));
    }
    Ok(())
}

fn permute<A: Clone>(x: &ArrayD<A>, order: &[usize]) -> ArrayD<A> {
    x.view()
        .permuted_axes(order.to_vec())
        .as_standard_layout()
        .into_owned()
}
