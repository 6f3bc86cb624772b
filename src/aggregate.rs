//! Grouped (scatter) reductions over rows of a feature tensor.
//!
//! An [`Aggregator`] reduces a `(N, F)` value tensor into `(dim_size, F)`
//! rows, where row `g` combines every input row whose group index is `g`:
//!
//! ```text
//! out[g] = REDUCE({ values[i] : index[i] == g })
//! ```
//!
//! Groups with no members produce a zero row for every reduction, so the
//! output always has exactly `dim_size` rows.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Error, Result};

/// Reduction applied within each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Arithmetic mean of the group.
    Mean,
    /// Element-wise maximum.
    Max,
    /// Element-wise minimum.
    Min,
    /// Element-wise sum.
    #[serde(alias = "add")]
    Sum,
}

impl Reduction {
    /// Every supported reduction.
    pub const ALL: [Reduction; 4] = [Self::Mean, Self::Max, Self::Min, Self::Sum];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" | "add" => Ok(Self::Sum),
            other => Err(Error::InvalidConfig(format!(
                "aggregator '{other}' is not one of the valid aggregators [mean, max, min, add]"
            ))),
        }
    }
}

/// Construction-time aggregator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Reduction applied within each group.
    pub reduction: Reduction,
    /// Default output row count. Call-time options take precedence.
    #[serde(default)]
    pub dim_size: Option<usize>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            reduction: Reduction::Mean,
            dim_size: None,
        }
    }
}

/// Call-time overrides for [`Aggregator::aggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Output row count for this call.
    pub dim_size: Option<usize>,
}

impl AggregateOptions {
    /// Options fixing the output row count.
    pub fn with_dim_size(dim_size: usize) -> Self {
        Self {
            dim_size: Some(dim_size),
        }
    }
}

/// Scatter-style aggregation layer.
///
/// # Example
///
/// ```rust,ignore
/// use graphnets::aggregate::{AggregateOptions, Aggregator};
///
/// let agg = Aggregator::new("mean")?;
/// // values: (E, F), receivers: (E,) u32
/// let per_node = agg.aggregate(&values, &receivers, AggregateOptions::with_dim_size(num_nodes))?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregator {
    config: AggregatorConfig,
}

impl Aggregator {
    /// Create an aggregator from a reduction name (`mean`, `max`, `min`, `add`/`sum`).
    ///
    /// Unknown names fail here rather than on the first call.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self::from_config(AggregatorConfig {
            reduction: name.parse()?,
            dim_size: None,
        }))
    }

    pub fn from_config(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn reduction(&self) -> Reduction {
        self.config.reduction
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Reduce `values` (`N x F`) into `dim_size x F` rows grouped by `index` (`N`).
    ///
    /// `dim_size` resolves from `options`, then the configured default, then
    /// `max(index) + 1`. `index` may be `u32` or `i64`.
    ///
    /// Sum and mean read a single scalar (the largest group id) back to the
    /// host for range checking. Max and min copy the whole index and value
    /// table to the host to pick winning rows.
    pub fn aggregate(
        &self,
        values: &Tensor,
        index: &Tensor,
        options: AggregateOptions,
    ) -> Result<Tensor> {
        if values.rank() != 2 {
            return Err(Error::DimensionMismatch {
                context: "aggregate values rank",
                expected: 2,
                got: values.rank(),
            });
        }
        if index.rank() != 1 {
            return Err(Error::DimensionMismatch {
                context: "aggregate index rank",
                expected: 1,
                got: index.rank(),
            });
        }
        let (n, f) = values.dims2()?;
        let len = index.dim(0)?;
        if len != n {
            return Err(Error::DimensionMismatch {
                context: "aggregate index length",
                expected: n,
                got: len,
            });
        }

        let configured = options.dim_size.or(self.config.dim_size);
        if n == 0 {
            let dim_size = configured.unwrap_or(0);
            return Ok(Tensor::zeros((dim_size, f), values.dtype(), values.device())?);
        }

        // index_add and gather need contiguous storage; narrowed views are not
        let values = values.contiguous()?;
        let index = match index.dtype() {
            DType::U32 => index.contiguous()?,
            _ => index.to_dtype(DType::U32)?.contiguous()?,
        };
        let ids = match self.config.reduction {
            Reduction::Max | Reduction::Min => Some(index.to_vec1::<u32>()?),
            Reduction::Sum | Reduction::Mean => None,
        };
        let max_id = match &ids {
            Some(ids) => ids.iter().copied().max().unwrap_or(0),
            None => index.max(0)?.to_scalar::<u32>()?,
        } as usize;
        let dim_size = configured.unwrap_or(max_id + 1);
        if max_id >= dim_size {
            return Err(Error::IndexOutOfRange {
                index: max_id,
                dim_size,
            });
        }
        trace!(reduction = %self.config.reduction, rows = n, dim_size, "aggregate");

        let zeros = Tensor::zeros((dim_size, f), values.dtype(), values.device())?;
        if f == 0 {
            return Ok(zeros);
        }

        let ids = ids.as_deref().unwrap_or_default();
        match self.config.reduction {
            Reduction::Sum => Ok(zeros.index_add(&index, &values, 0)?),
            Reduction::Mean => {
                let sum = zeros.index_add(&index, &values, 0)?;
                let ones = Tensor::ones((n, 1), values.dtype(), values.device())?;
                let counts = Tensor::zeros((dim_size, 1), values.dtype(), values.device())?
                    .index_add(&index, &ones, 0)?;
                // empty groups divide a zero sum by one
                Ok(sum.broadcast_div(&counts.maximum(1f64)?)?)
            }
            Reduction::Max => select_extreme(&values, ids, &zeros, |a, b| a > b),
            Reduction::Min => select_extreme(&values, ids, &zeros, |a, b| a < b),
        }
    }
}

/// Element-wise arg-extreme per group.
///
/// Winning rows are chosen on the host in `f64`, which holds every float
/// dtype exactly. The values themselves are gathered from `values` so
/// gradients flow to the selected entries; empty groups take `zeros`.
fn select_extreme(
    values: &Tensor,
    ids: &[u32],
    zeros: &Tensor,
    wins: impl Fn(f64, f64) -> bool,
) -> Result<Tensor> {
    let (dim_size, f) = zeros.dims2()?;
    let host = values.to_dtype(DType::F64)?.to_vec2::<f64>()?;

    let mut winner: Vec<Option<usize>> = vec![None; dim_size * f];
    let mut seen = vec![0u8; dim_size];
    for (row, (&group, feats)) in ids.iter().zip(host.iter()).enumerate() {
        let group = group as usize;
        seen[group] = 1;
        for (col, &v) in feats.iter().enumerate() {
            let slot = &mut winner[group * f + col];
            let replace = match *slot {
                None => true,
                Some(best) => wins(v, host[best][col]),
            };
            if replace {
                *slot = Some(row);
            }
        }
    }

    let rows: Vec<u32> = winner.iter().map(|w| w.unwrap_or(0) as u32).collect();
    let rows = Tensor::from_vec(rows, (dim_size, f), values.device())?;
    let mask = Tensor::from_vec(seen, (dim_size, 1), values.device())?
        .broadcast_as((dim_size, f))?
        .contiguous()?;
    Ok(mask.where_cond(&values.gather(&rows, 0)?, zeros)?)
}
