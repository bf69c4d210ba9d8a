#![forbid(unsafe_code)]

//! Property tests for the window reducers and the datetime conversions.
//!
//! Strategies generate arbitrary but well-formed inputs (bin edges, sorted
//! group labels, small matrices, in-range nanosecond values); each property
//! must hold for every generated case.

use proptest::prelude::*;

use fp_columnar::{ColumnData, Layout, Matrix};
use fp_datetime::{
    ArrayToDatetimeOptions, DateLike, DatetimeArray, FormatOptions, NAT, NumericInput,
    array_to_datetime, array_with_unit_to_datetime, format_array_from_datetime,
};
use fp_frame::Series;
use fp_index::Index;
use fp_reduction::{Axis, ReduceError, ReduceOptions, Reduced, reduce_bins, reduce_labels, reduce_rows};
use fp_runtime::ErrorPolicy;

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// Values plus non-decreasing bin edges that stay inside `0..=len`.
fn arb_binned(max_len: usize) -> impl Strategy<Value = (Vec<f64>, Vec<i64>)> {
    (1..=max_len).prop_flat_map(|len| {
        let values = prop::collection::vec(-1_000.0_f64..1_000.0, len);
        let edges = prop::collection::vec(0..=len as i64, 1..5).prop_map(|mut edges| {
            edges.sort_unstable();
            edges
        });
        (values, edges)
    })
}

/// Sorted group labels in `-1..ngroups`, at least one of them not `-1`.
fn arb_sorted_labels(max_len: usize) -> impl Strategy<Value = (Vec<i64>, usize)> {
    (1_usize..6, 1..=max_len).prop_flat_map(|(ngroups, len)| {
        prop::collection::vec(-1..ngroups as i64, len)
            .prop_filter("needs a non-excluded row", |labels| {
                labels.iter().any(|label| *label != -1)
            })
            .prop_map(move |mut labels| {
                labels.sort_unstable();
                (labels, ngroups)
            })
    })
}

/// Row-major rows of small integral floats, so sums stay exact.
fn arb_rows(max_dim: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    (1..=max_dim, 1..=max_dim).prop_flat_map(|(nrows, ncols)| {
        prop::collection::vec(
            prop::collection::vec((-500_i32..500).prop_map(f64::from), ncols),
            nrows,
        )
    })
}

/// Nanosecond values inside the representable range, with some NaT.
fn arb_nanos(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(
        prop_oneof![
            8 => (NAT + 1)..=i64::MAX,
            1 => Just(NAT),
        ],
        0..max_len,
    )
}

fn empty_dummy() -> Series {
    Series::new(None, Index::new(Vec::new()), ColumnData::Float64(Vec::new()))
        .expect("empty dummy")
}

fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

// ---------------------------------------------------------------------------
// Property: group reduction bookkeeping
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Bin counts partition the input and the first count is the first edge.
    #[test]
    fn prop_bin_counts_partition_values((values, edges) in arb_binned(30)) {
        let index = Index::from_range(0, values.len() as i64, 1);
        let result = reduce_bins(&values, &index, None, &edges, &empty_dummy(), |s| {
            Ok(Reduced::from(s.len() as i64))
        })
        .expect("valid bins reduce");

        let total: i64 = result.counts.iter().sum();
        prop_assert_eq!(total, values.len() as i64);
        prop_assert_eq!(result.counts[0], edges[0]);
        prop_assert_eq!(result.values, ColumnData::Int64(result.counts.clone()));
    }

    /// Per-bin sums add up to the sum of the whole input.
    #[test]
    fn prop_bin_sums_add_up((values, edges) in arb_binned(30)) {
        let values: Vec<f64> = values.iter().map(|v| v.trunc()).collect();
        let index = Index::from_range(0, values.len() as i64, 1);
        let result = reduce_bins(&values, &index, None, &edges, &empty_dummy(), |s| {
            Ok(Reduced::from(sum(s.values())))
        })
        .expect("valid bins reduce");

        match result.values {
            ColumnData::Float64(sums) => prop_assert_eq!(sum(&sums), sum(&values)),
            other => prop_assert!(false, "unexpected column {:?}", other),
        }
    }

    /// Rows labeled -1 are never counted or shown to the callback.
    #[test]
    fn prop_excluded_rows_never_counted((labels, ngroups) in arb_sorted_labels(30)) {
        let values: Vec<f64> = labels.iter().map(|label| *label as f64).collect();
        let index = Index::from_range(0, values.len() as i64, 1);
        let mut seen_excluded = false;
        let result = reduce_labels(&values, &index, None, &labels, ngroups, &empty_dummy(), |s| {
            seen_excluded |= s.values().contains(&-1.0);
            Ok(Reduced::from(s.len() as i64))
        })
        .expect("labels reduce");

        let included = labels.iter().filter(|label| **label != -1).count() as i64;
        prop_assert!(!seen_excluded);
        prop_assert_eq!(result.counts.len(), ngroups);
        prop_assert_eq!(result.counts.iter().sum::<i64>(), included);
    }
}

// ---------------------------------------------------------------------------
// Property: row reducer layouts
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Column sums do not depend on the storage layout.
    #[test]
    fn prop_column_sums_ignore_layout(rows in arb_rows(8)) {
        let row_major = Matrix::from_rows(rows).expect("rectangular rows");
        let col_major = row_major.with_layout(Layout::ColumnMajor).into_owned();

        let by_rows = reduce_rows(
            &row_major,
            |s| Ok(Reduced::from(sum(s.values()))),
            ReduceOptions::along(Axis::Rows),
            None,
            None,
        )
        .expect("row-major reduce");
        let by_cols = reduce_rows(
            &col_major,
            |s| Ok(Reduced::from(sum(s.values()))),
            ReduceOptions::along(Axis::Rows),
            None,
            None,
        )
        .expect("column-major reduce");
        prop_assert_eq!(by_rows, by_cols);
    }

    /// Summing rows then columns agrees with summing columns then rows.
    #[test]
    fn prop_row_and_column_totals_agree(rows in arb_rows(8)) {
        let matrix = Matrix::from_rows(rows).expect("rectangular rows");
        let totals = [Axis::Rows, Axis::Columns].map(|axis| {
            match reduce_rows(
                &matrix,
                |s| Ok(Reduced::from(sum(s.values()))),
                ReduceOptions::along(axis),
                None,
                None,
            ) {
                Ok(ColumnData::Float64(sums)) => Some(sum(&sums)),
                _ => None,
            }
        });
        prop_assert!(totals[0].is_some());
        prop_assert_eq!(totals[0], totals[1]);
    }

    /// Handing back the window as an array is never a reduction.
    #[test]
    fn prop_window_arrays_do_not_reduce(rows in arb_rows(6), axis_rows in any::<bool>()) {
        let matrix = Matrix::from_rows(rows).expect("rectangular rows");
        let axis = if axis_rows { Axis::Rows } else { Axis::Columns };
        let err = reduce_rows(
            &matrix,
            |s| Ok(Reduced::Array(s.to_scalars())),
            ReduceOptions::along(axis),
            None,
            None,
        )
        .expect_err("arrays do not reduce");
        prop_assert!(matches!(err, ReduceError::DoesNotReduce));
    }
}

// ---------------------------------------------------------------------------
// Property: datetime conversions
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Default rendering keeps every digit needed to parse the value back.
    #[test]
    fn prop_formatted_values_parse_back(values in arb_nanos(20)) {
        let rendered = format_array_from_datetime(&values, &FormatOptions::default());
        prop_assert_eq!(rendered.len(), values.len());

        let inputs: Vec<DateLike> = rendered.iter().map(|s| DateLike::from(s.as_str())).collect();
        let parsed = array_to_datetime(&inputs, &ArrayToDatetimeOptions::default())
            .expect("rendered values parse");
        match parsed {
            DatetimeArray::Int64 { values: back, tz } => {
                prop_assert_eq!(back, values);
                prop_assert_eq!(tz, None);
            }
            DatetimeArray::Object(objects) => {
                prop_assert!(false, "unexpected object fallback {:?}", objects);
            }
        }
    }

    /// Every rendered value in one array has the same width.
    #[test]
    fn prop_rendered_precision_is_shared(values in arb_nanos(20)) {
        let rendered = format_array_from_datetime(&values, &FormatOptions::default());
        let widths: Vec<usize> = values
            .iter()
            .zip(&rendered)
            .filter(|(value, _)| **value != NAT)
            .map(|(_, text)| text.len())
            .collect();
        prop_assert!(widths.windows(2).all(|pair| pair[0] == pair[1]));
    }

    /// Integer seconds scale exactly and NaT passes through.
    #[test]
    fn prop_seconds_scale_exactly(
        seconds in prop::collection::vec(
            prop_oneof![9 => -9_000_000_000_i64..9_000_000_000, 1 => Just(NAT)],
            0..20,
        )
    ) {
        let out = array_with_unit_to_datetime(NumericInput::Int64(&seconds), "s", ErrorPolicy::Raise)
            .expect("in-range seconds");
        let expected: Vec<i64> = seconds
            .iter()
            .map(|s| if *s == NAT { NAT } else { s * 1_000_000_000 })
            .collect();
        prop_assert_eq!(out.values(), Some(expected.as_slice()));
    }

    /// Coerce never fails and keeps the input length.
    #[test]
    fn prop_coerce_never_fails(texts in prop::collection::vec("[0-9a-zA-Z :/.-]{0,16}", 0..12)) {
        let inputs: Vec<DateLike> = texts.iter().map(|s| DateLike::from(s.as_str())).collect();
        let options = ArrayToDatetimeOptions::with_errors(ErrorPolicy::Coerce);
        let out = array_to_datetime(&inputs, &options).expect("coerce does not raise");
        prop_assert_eq!(out.len(), inputs.len());
    }
}
