//! Window and grace-period validation
//!
//! Checks requested window sizes against the configured base unit and computes
//! the grace cascade: the hub gets `grace_seconds + 1`, and every coarser
//! window gets one second more than the window before it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ValidationError;
use crate::model::Timeframe;

/// Per-timeframe grace periods in seconds, hub included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraceMap {
    entries: BTreeMap<Timeframe, u32>,
}

impl GraceMap {
    pub fn get(&self, timeframe: &Timeframe) -> Option<u32> {
        self.entries.get(timeframe).copied()
    }

    /// Entries in ascending timeframe order.
    pub fn iter(&self) -> impl Iterator<Item = (&Timeframe, &u32)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validate `windows` and compute the grace cascade.
///
/// The cascade covers the 1-second hub plus every requested window. Entries in
/// `overrides` must agree with the computed value; they are never applied
/// silently.
pub fn validate(
    windows: &[Timeframe],
    base_unit_seconds: Option<u32>,
    grace_seconds: Option<u32>,
    overrides: &BTreeMap<Timeframe, u32>,
) -> Result<GraceMap, ValidationError> {
    let base = base_unit_seconds.ok_or(ValidationError::MissingBaseUnit)?;
    if base == 0 || 60 % base != 0 {
        return Err(ValidationError::BaseUnitNotDivisor(base));
    }

    for window in windows {
        let secs = window.duration_seconds();
        if secs % base as u64 != 0 {
            return Err(ValidationError::WindowNotMultipleOfBase {
                window: *window,
                base_unit: base,
            });
        }
        if secs >= 60 && secs % 60 != 0 {
            return Err(ValidationError::WindowNotWholeMinutes(*window));
        }
    }

    let mut cascade: Vec<Timeframe> = windows.to_vec();
    if !cascade.iter().any(|w| w.is_hub()) {
        cascade.push(Timeframe::ONE_SECOND);
    }
    cascade.sort();
    cascade.dedup_by(|a, b| a.duration_seconds() == b.duration_seconds());

    let mut grace = grace_seconds.unwrap_or(0);
    let mut entries = BTreeMap::new();
    for window in cascade {
        grace += 1;
        if let Some(&configured) = overrides.get(&window) {
            if configured != grace {
                return Err(ValidationError::GraceMismatch {
                    window,
                    configured,
                    expected: grace,
                });
            }
        }
        entries.insert(window, grace);
    }

    debug!(base_unit = base, windows = entries.len(), "Validated window cascade");
    Ok(GraceMap { entries })
}
