//! Per-run configuration document builder.
//!
//! The control server expects each request to carry a serialized
//! `CompilerConfig` document. Building it is a pure function of the run
//! options: no hidden state, no network calls, and byte-stable output for
//! a fixed set of inputs, so an unchanged server keeps accepting it.

use std::str::FromStr;

use serde_json::json;

use crate::error::{BackendError, BackendResult};

/// The only optimization backend the control server supports.
pub const DEFAULT_OPTIMIZER: &str = "Tket";

/// Fixed metrics selection sent with every request.
const METRICS_VALUE: u32 = 6;

/// How the server processes and formats measurement results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    /// Raw per-shot results.
    Raw,
    /// Results as binary strings.
    Binary,
    /// Counts per measured register value.
    #[default]
    BinaryCount,
    /// Binary result lists squashed into a single bit string.
    SquashBinaryResultArrays,
}

impl ResultFormat {
    /// The server-side `(format, transforms)` integer codes.
    fn codes(self) -> (u32, u32) {
        match self {
            ResultFormat::BinaryCount => (1, 3),
            ResultFormat::Raw => (1, 2),
            ResultFormat::Binary => (2, 2),
            ResultFormat::SquashBinaryResultArrays => (2, 6),
        }
    }

    /// The caller-facing name of this format.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultFormat::Raw => "raw",
            ResultFormat::Binary => "binary",
            ResultFormat::BinaryCount => "binary_count",
            ResultFormat::SquashBinaryResultArrays => "squash_binary_result_arrays",
        }
    }
}

impl FromStr for ResultFormat {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(ResultFormat::Raw),
            "binary" => Ok(ResultFormat::Binary),
            "binary_count" => Ok(ResultFormat::BinaryCount),
            "squash_binary_result_arrays" => Ok(ResultFormat::SquashBinaryResultArrays),
            other => Err(BackendError::UnknownResultFormat(other.to_string())),
        }
    }
}

/// Options for one run, independent of any scheduler concern.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of circuit executions. Must be positive.
    pub shots: u32,
    /// Duration of one execution window, including relaxation time,
    /// in seconds.
    pub repetition_period: Option<f64>,
    /// Optimization level, `0` (off), `1` or `2`; interpreted server-side.
    pub optimization: u8,
    /// Result processing applied server-side.
    pub result_format: ResultFormat,
    /// Optimization backend name. Only [`DEFAULT_OPTIMIZER`] is accepted.
    pub optimizer: String,
}

impl RunOptions {
    /// Options with the given shot count and defaults for the rest.
    pub fn new(shots: u32) -> Self {
        Self {
            shots,
            repetition_period: None,
            optimization: 0,
            result_format: ResultFormat::default(),
            optimizer: DEFAULT_OPTIMIZER.to_string(),
        }
    }

    /// Set the repetition period in seconds.
    pub fn with_repetition_period(mut self, seconds: f64) -> Self {
        self.repetition_period = Some(seconds);
        self
    }

    /// Set the optimization level.
    pub fn with_optimization(mut self, level: u8) -> Self {
        self.optimization = level;
        self
    }

    /// Set the result format.
    pub fn with_result_format(mut self, format: ResultFormat) -> Self {
        self.result_format = format;
        self
    }
}

/// Map an optimization level to the server-side `TketOptimizations` value.
fn optimization_value(level: u8, optimizer: &str) -> BackendResult<u32> {
    if optimizer != DEFAULT_OPTIMIZER {
        return Err(BackendError::UnsupportedOptimizer(optimizer.to_string()));
    }
    match level {
        0 => Ok(1),
        1 => Ok(18),
        2 => Ok(30),
        other => Err(BackendError::InvalidOptimizationLevel(other)),
    }
}

/// Build the serialized configuration document for one run.
pub fn build_config(options: &RunOptions) -> BackendResult<String> {
    if options.shots == 0 {
        return Err(BackendError::InvalidShots);
    }
    if let Some(period) = options.repetition_period {
        if period <= 0.0 || period.is_nan() {
            return Err(BackendError::InvalidRepetitionPeriod(period));
        }
    }

    let (format, transforms) = options.result_format.codes();
    let optimizations = optimization_value(options.optimization, &options.optimizer)?;

    // The $type/$data/$value envelope is the server's own serialization
    // scheme; field names and type tags must not change.
    let document = json!({
        "$type": "<class 'qat.purr.compiler.config.CompilerConfig'>",
        "$data": {
            "repeats": options.shots,
            "repetition_period": options.repetition_period,
            "results_format": {
                "$type": "<class 'qat.purr.compiler.config.QuantumResultsFormat'>",
                "$data": {
                    "format": {
                        "$type": "<enum 'qat.purr.compiler.config.InlineResultsProcessing'>",
                        "$value": format,
                    },
                    "transforms": {
                        "$type": "<enum 'qat.purr.compiler.config.ResultsFormatting'>",
                        "$value": transforms,
                    },
                },
            },
            "metrics": {
                "$type": "<enum 'qat.purr.compiler.config.MetricsType'>",
                "$value": METRICS_VALUE,
            },
            "active_calibrations": [],
            "optimizations": {
                "$type": "<enum 'qat.purr.compiler.config.TketOptimizations'>",
                "$value": optimizations,
            },
        },
    });

    Ok(document.to_string())
}
