use crate::error::{Result, StabilityError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Map from sequence id to the ordered positions where a group member
/// differs from its group's reference sequence.
pub type DiffLocationMap = HashMap<i64, Vec<usize>>;

/// One protein row extracted from the record table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProteinRecord {
    pub seq_id: i64,
    pub sequence: String,
    pub ph: f64,
    pub tm: Option<f64>,
    pub sub_group: Option<u32>,
    pub sub_locations: Option<Vec<usize>>,
}

/// Extracts protein records from a DataFrame.
///
/// # Arguments
/// * `df` - DataFrame with columns "seq_id", "protein_sequence" and "pH";
///   "tm", "sub_group" and "sub_locations" are picked up when present
///
/// # Returns
/// * `Result<Vec<ProteinRecord>>` - One record per row, in row order
///
/// # Errors
/// * Returns `StabilityError::DataError` if a required column is missing,
///   has the wrong dtype, or holds a null in a required field
pub fn records_from_frame(df: &DataFrame) -> Result<Vec<ProteinRecord>> {
    let seq_ids = df
        .column("seq_id")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .i64()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    let sequences = df
        .column("protein_sequence")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .str()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    let ph = df
        .column("pH")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .f64()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;

    let tm = match df.column("tm") {
        Ok(col) => Some(
            col.f64()
                .map_err(|e| StabilityError::DataError(e.to_string()))?,
        ),
        Err(_) => None,
    };
    let sub_group = match df.column("sub_group") {
        Ok(col) => Some(
            col.u32()
                .map_err(|e| StabilityError::DataError(e.to_string()))?,
        ),
        Err(_) => None,
    };
    let sub_locations = match df.column("sub_locations") {
        Ok(col) => Some(
            col.list()
                .map_err(|e| StabilityError::DataError(e.to_string()))?,
        ),
        Err(_) => None,
    };

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let locations = match sub_locations.and_then(|ca| ca.get_as_series(i)) {
            Some(s) if !s.is_empty() => {
                let s = s
                    .cast(&DataType::UInt32)
                    .map_err(|e| StabilityError::DataError(e.to_string()))?;
                Some(
                    s.u32()
                        .map_err(|e| StabilityError::DataError(e.to_string()))?
                        .into_no_null_iter()
                        .map(|v| v as usize)
                        .collect(),
                )
            }
            _ => None,
        };

        records.push(ProteinRecord {
            seq_id: seq_ids
                .get(i)
                .ok_or_else(|| StabilityError::DataError(format!("null seq_id in row {}", i)))?,
            sequence: sequences
                .get(i)
                .ok_or_else(|| {
                    StabilityError::DataError(format!("null protein_sequence in row {}", i))
                })?
                .to_string(),
            ph: ph
                .get(i)
                .ok_or_else(|| StabilityError::DataError(format!("null pH in row {}", i)))?,
            tm: tm.and_then(|ca| ca.get(i)),
            sub_group: sub_group.and_then(|ca| ca.get(i)),
            sub_locations: locations,
        });
    }

    Ok(records)
}
