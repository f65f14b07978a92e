//! Record assembly.
//!
//! Expands accepted frames into a flat timestamp-indexed table, one row
//! per valid record, columns in header-declared order. Timestamps are
//! rounded to the nearest multiple of the nominal interval after assembly
//! to absorb float drift from the repeated tick multiplication.

use hifitime::Epoch;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::decoder::DecodedFrame;
use crate::header::{ColumnDescriptor, FileHeader};
use crate::layout::RecordLayout;

/// The assembled output table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<ColumnDescriptor>,
    /// One timestamp per row, non-decreasing by construction.
    pub timestamps: Vec<Epoch>,
    /// Row-major data block, one column per [`ColumnDescriptor`].
    pub data: Array2<f64>,
}

impl Table {
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Accumulates records from accepted frames into a [`Table`].
pub struct Assembler {
    columns: Vec<ColumnDescriptor>,
    layout: RecordLayout,
    interval: f64,
    times: Vec<f64>,
    values: Vec<f64>,
}

impl Assembler {
    #[must_use]
    pub fn new(header: &FileHeader) -> Self {
        Assembler {
            columns: header.columns.clone(),
            layout: header.layout(),
            interval: header.interval,
            times: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append the valid records of an accepted frame. Record `i` gets
    /// timestamp `base + i * interval`.
    pub fn push_frame(&mut self, decoded: &DecodedFrame) {
        let record_size = self.layout.record_size();
        let body = decoded.frame.body();
        for i in 0..decoded.valid_records {
            let Some(record) = self.layout.decode_record(&body[i * record_size..]) else {
                break;
            };
            self.times.push(decoded.base + i as f64 * self.interval);
            self.values.extend(record);
        }
    }

    /// Produce the final table, optionally clipped to the first `clip`
    /// rows.
    #[must_use]
    pub fn finish(mut self, clip: Option<usize>) -> Table {
        let ncols = self.columns.len();
        if let Some(n) = clip {
            if n < self.times.len() {
                trace!(rows = self.times.len(), clip = n, "clipping table");
                self.times.truncate(n);
                self.values.truncate(n * ncols);
            }
        }
        let timestamps = self
            .times
            .iter()
            .map(|&t| Epoch::from_unix_seconds(round_to_interval(t, self.interval)))
            .collect();
        let nrows = self.times.len();
        let data = Array2::from_shape_vec((nrows, ncols), self.values)
            .expect("record count and column count to agree");
        Table {
            columns: self.columns,
            timestamps,
            data,
        }
    }
}

fn round_to_interval(t: f64, interval: f64) -> f64 {
    if interval > 0.0 {
        (t / interval).round() * interval
    } else {
        t
    }
}

/// A summary aggregate computed per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    /// Sample standard deviation (n - 1 denominator).
    Std,
}

impl Aggregate {
    /// Suffix used for derived column names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Std => "std",
        }
    }

    fn apply(self, xs: ArrayView1<f64>) -> f64 {
        match self {
            Aggregate::Count => xs.len() as f64,
            Aggregate::Sum => xs.sum(),
            Aggregate::Mean => xs.mean().unwrap_or(f64::NAN),
            Aggregate::Min => xs.fold(f64::INFINITY, |a, &b| a.min(b)),
            Aggregate::Max => xs.fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            Aggregate::Std => sample_std(xs),
        }
    }
}

fn sample_std(xs: ArrayView1<f64>) -> f64 {
    let n = xs.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = xs.mean().unwrap_or(f64::NAN);
    let ss: f64 = xs.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (n as f64 - 1.0)).sqrt()
}

/// Collapse `table` to a single row holding `aggregates` per column,
/// timestamped at the last record's timestamp. Derived column names are
/// `{column}_{aggregate}`.
#[must_use]
pub fn summarize(table: &Table, aggregates: &[Aggregate]) -> Table {
    let mut columns = Vec::with_capacity(table.columns.len() * aggregates.len());
    let mut values = Vec::with_capacity(columns.capacity());
    for (j, column) in table.columns.iter().enumerate() {
        for aggregate in aggregates {
            let mut derived = column.clone();
            derived.name = format!("{}_{}", column.name, aggregate.name());
            derived.aggregation = aggregate.name().to_string();
            columns.push(derived);
            values.push(aggregate.apply(table.data.column(j)));
        }
    }
    let (timestamps, nrows) = match table.timestamps.last() {
        Some(&last) => (vec![last], 1),
        None => {
            values.clear();
            (Vec::new(), 0)
        }
    };
    let ncols = columns.len();
    let data =
        Array2::from_shape_vec((nrows, ncols), values).expect("one value per derived column");
    Table {
        columns,
        timestamps,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StorageType;
    use ndarray::array;

    fn columns(names: &[&str]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .map(|name| ColumnDescriptor {
                name: (*name).to_string(),
                unit: "m/s".to_string(),
                aggregation: "Smp".to_string(),
                storage: StorageType::Float32Big,
                ignore: false,
            })
            .collect()
    }

    fn table(names: &[&str], times: &[f64], rows: Array2<f64>) -> Table {
        Table {
            columns: columns(names),
            timestamps: times.iter().map(|&t| Epoch::from_unix_seconds(t)).collect(),
            data: rows,
        }
    }

    #[test]
    fn round_to_interval_absorbs_drift() {
        // Compare against the exact products; 0.1 steps are not exact in
        // f64 so the decimal literals differ in the last ulp.
        assert_eq!(round_to_interval(100.099_999_999, 0.1), 1001.0 * 0.1);
        assert_eq!(round_to_interval(100.300_000_001, 0.1), 1003.0 * 0.1);
        // Zero interval leaves the timestamp untouched.
        assert_eq!(round_to_interval(100.05, 0.0), 100.05);
    }

    #[test]
    fn summarize_names_and_values() {
        let t = table(
            &["Ux", "Ts"],
            &[10.0, 11.0, 12.0],
            array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]],
        );
        let summary = summarize(&t, &[Aggregate::Mean, Aggregate::Max]);

        let names: Vec<&str> = summary.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Ux_mean", "Ux_max", "Ts_mean", "Ts_max"]);
        assert_eq!(summary.num_rows(), 1);
        assert_eq!(summary.timestamps[0], Epoch::from_unix_seconds(12.0));
        assert_eq!(summary.data, array![[2.0, 3.0, 20.0, 30.0]]);
    }

    #[test]
    fn summarize_count_sum_std() {
        let t = table(&["Ux"], &[1.0, 2.0], array![[2.0], [4.0]]);
        let summary = summarize(&t, &[Aggregate::Count, Aggregate::Sum, Aggregate::Std]);
        assert_eq!(summary.data[[0, 0]], 2.0);
        assert_eq!(summary.data[[0, 1]], 6.0);
        // sample std of {2, 4} = sqrt(2)
        assert!((summary.data[[0, 2]] - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn summarize_empty_table_stays_empty() {
        let t = table(&["Ux"], &[], Array2::zeros((0, 1)));
        let summary = summarize(&t, &[Aggregate::Mean]);
        assert!(summary.is_empty());
        assert_eq!(summary.columns.len(), 1);
        assert_eq!(summary.columns[0].name, "Ux_mean");
    }

    #[test]
    fn std_of_single_row_is_nan() {
        let t = table(&["Ux"], &[1.0], array![[5.0]]);
        let summary = summarize(&t, &[Aggregate::Std]);
        assert!(summary.data[[0, 0]].is_nan());
    }
}
