//! Chunk planning.
//!
//! Splits a media timeline into fixed-length slices. Every slice after the
//! first is pulled back by the overlap so words cut at a boundary are heard by
//! both neighbouring chunks; the first slice always starts at zero and the
//! last one is clamped to the media duration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default slice length in seconds.
pub const DEFAULT_SLICE_SECS: f64 = 600.0;

/// Default backward overlap in seconds.
pub const DEFAULT_OVERLAP_SECS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("slice length must be a positive number of seconds, got {0}")]
    InvalidSlice(f64),

    #[error("overlap must be non-negative and shorter than the slice, got {overlap} (slice {slice})")]
    InvalidOverlap { overlap: f64, slice: f64 },
}

/// One planned time slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedChunk {
    pub index: u32,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// The full plan for one media source, together with the parameters that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkPlan {
    pub duration_secs: f64,
    pub slice_secs: f64,
    pub overlap_secs: f64,
    pub chunks: Vec<PlannedChunk>,
}

impl ChunkPlan {
    pub fn new(duration_secs: f64, slice_secs: f64, overlap_secs: f64) -> Result<Self, PlanError> {
        let chunks = plan_chunks(duration_secs, slice_secs, overlap_secs)?;
        Ok(Self {
            duration_secs: duration_secs.max(0.0),
            slice_secs,
            overlap_secs,
            chunks,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Plan chunk boundaries for a media source.
///
/// A non-positive (or non-finite) duration yields an empty plan. Indices are
/// dense and zero-based, and every chunk satisfies `end > start`.
pub fn plan_chunks(
    duration_secs: f64,
    slice_secs: f64,
    overlap_secs: f64,
) -> Result<Vec<PlannedChunk>, PlanError> {
    if !slice_secs.is_finite() || slice_secs <= 0.0 {
        return Err(PlanError::InvalidSlice(slice_secs));
    }
    if !overlap_secs.is_finite() || overlap_secs < 0.0 || overlap_secs >= slice_secs {
        return Err(PlanError::InvalidOverlap {
            overlap: overlap_secs,
            slice: slice_secs,
        });
    }
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut index: u32 = 0;
    loop {
        // Multiply rather than accumulate so long timelines do not drift.
        let nominal_start = f64::from(index) * slice_secs;
        if nominal_start >= duration_secs {
            break;
        }

        let pull_back = if index == 0 { 0.0 } else { overlap_secs };
        let start_secs = (nominal_start - pull_back).max(0.0);
        let end_secs = (nominal_start + slice_secs).min(duration_secs);
        if end_secs <= start_secs {
            break;
        }

        chunks.push(PlannedChunk {
            index,
            start_secs,
            end_secs,
        });
        index += 1;
    }

    Ok(chunks)
}
