#![forbid(unsafe_code)]

//! JSON fixture harness for the datetime conversion engine.
//!
//! Each fixture packet is one JSON file under `fixtures/packets/` naming an
//! operation, its inputs and the expected outcome. The harness runs every
//! packet and reports mismatches instead of failing fast.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use fp_datetime::{
    ArrayToDatetimeOptions, BoxKind, BoxedDatetime, DateLike, DatetimeArray, FormatListParser,
    FormatOptions, NAT, NumericInput, TimeUnit, Tz, array_to_datetime_with,
    array_with_unit_to_datetime_with_ledger, format_array_from_datetime, ints_to_pydatetime,
};
use fp_runtime::{ConversionLedger, ErrorPolicy};
use fp_types::NullKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }

    #[must_use]
    pub fn packet_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("packets")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    ArrayToDatetime,
    ArrayWithUnitToDatetime,
    FormatArrayFromDatetime,
    IntsToPydatetime,
}

/// A date-like input value as written in a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FixtureDatelike {
    Null,
    Nan,
    Nat,
    Int(i64),
    Float(f64),
    Str(String),
    Datetime {
        local: NaiveDateTime,
        #[serde(default)]
        offset_seconds: Option<i32>,
    },
    Date(NaiveDate),
    Datetime64 {
        value: i64,
        unit: TimeUnit,
    },
    Other(String),
}

impl FixtureDatelike {
    fn to_datelike(&self) -> Result<DateLike, String> {
        Ok(match self {
            Self::Null => DateLike::Null(NullKind::Null),
            Self::Nan => DateLike::Null(NullKind::NaN),
            Self::Nat => DateLike::NaT,
            Self::Int(v) => DateLike::Int(*v),
            Self::Float(v) => DateLike::Float(*v),
            Self::Str(v) => DateLike::Str(v.clone()),
            Self::Datetime {
                local,
                offset_seconds,
            } => DateLike::Datetime {
                local: *local,
                offset: offset_seconds.map(fixed_offset).transpose()?,
            },
            Self::Date(date) => DateLike::Date(*date),
            Self::Datetime64 { value, unit } => DateLike::Datetime64 {
                value: *value,
                unit: *unit,
            },
            Self::Other(type_name) => DateLike::Other(type_name.clone()),
        })
    }
}

fn fixed_offset(seconds: i32) -> Result<FixedOffset, String> {
    FixedOffset::east_opt(seconds).ok_or_else(|| format!("offset {seconds}s out of range"))
}

/// The numeric input form for `array_with_unit_to_datetime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum FixtureNumeric {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Object(Vec<FixtureDatelike>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketFixture {
    pub packet_id: String,
    pub case_id: String,
    pub operation: FixtureOperation,
    #[serde(default)]
    pub values: Option<Vec<FixtureDatelike>>,
    #[serde(default)]
    pub numeric: Option<FixtureNumeric>,
    /// Nanosecond inputs; `null` is NaT.
    #[serde(default)]
    pub nanos: Option<Vec<Option<i64>>>,
    #[serde(default)]
    pub options: ArrayToDatetimeOptions,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub errors: ErrorPolicy,
    #[serde(default)]
    pub format_options: Option<FormatOptions>,
    #[serde(default)]
    pub tz: Option<Tz>,
    #[serde(default)]
    pub freq: Option<String>,
    #[serde(default)]
    pub box_kind: BoxKind,
    /// Expected nanosecond output; `null` is NaT.
    #[serde(default)]
    pub expected_values: Option<Vec<Option<i64>>>,
    #[serde(default)]
    pub expected_tz_seconds: Option<i32>,
    #[serde(default)]
    pub expected_object: Option<Vec<FixtureDatelike>>,
    #[serde(default)]
    pub expected_strings: Option<Vec<String>>,
    #[serde(default)]
    pub expected_error_contains: Option<String>,
    #[serde(default)]
    pub expected_ledger_len: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub packet_id: String,
    pub case_id: String,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    #[serde(default)]
    pub elapsed_us: u64,
    pub ledger_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketParityReport {
    pub suite: String,
    pub packet_id: Option<String>,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl PacketParityReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CaseResult> {
        self.results
            .iter()
            .filter(|result| result.status == CaseStatus::Fail)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

// ── Suite entry points ─────────────────────────────────────────────────

pub fn run_packet_suite(config: &HarnessConfig) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, None)?;
    build_report("datetime_packets".to_owned(), None, &fixtures)
}

pub fn run_packet_by_id(
    config: &HarnessConfig,
    packet_id: &str,
) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, Some(packet_id))?;
    build_report(
        format!("datetime_packets:{packet_id}"),
        Some(packet_id.to_owned()),
        &fixtures,
    )
}

pub fn run_packets_grouped(config: &HarnessConfig) -> Result<Vec<PacketParityReport>, HarnessError> {
    let fixtures = load_fixtures(config, None)?;
    let mut grouped = BTreeMap::<String, Vec<PacketFixture>>::new();
    for fixture in fixtures {
        grouped
            .entry(fixture.packet_id.clone())
            .or_default()
            .push(fixture);
    }

    grouped
        .into_iter()
        .map(|(packet_id, packet_fixtures)| {
            build_report(
                format!("datetime_packets:{packet_id}"),
                Some(packet_id),
                &packet_fixtures,
            )
        })
        .collect()
}

/// Parse one packet from JSON text.
pub fn parse_fixture(body: &str) -> Result<PacketFixture, HarnessError> {
    Ok(serde_json::from_str(body)?)
}

fn build_report(
    suite: String,
    packet_id: Option<String>,
    fixtures: &[PacketFixture],
) -> Result<PacketParityReport, HarnessError> {
    let results = fixtures
        .iter()
        .map(run_fixture)
        .collect::<Result<Vec<_>, _>>()?;
    let failed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Fail)
        .count();
    Ok(PacketParityReport {
        suite,
        packet_id,
        fixture_count: results.len(),
        passed: results.len().saturating_sub(failed),
        failed,
        results,
    })
}

fn load_fixtures(
    config: &HarnessConfig,
    packet_filter: Option<&str>,
) -> Result<Vec<PacketFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.packet_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());
    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if packet_filter.is_none_or(|packet| fixture.packet_id == packet) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<PacketFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    parse_fixture(&body)
        .map_err(|err| HarnessError::FixtureFormat(format!("{}: {err}", path.display())))
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

// ── Case execution ─────────────────────────────────────────────────────

fn run_fixture(fixture: &PacketFixture) -> Result<CaseResult, HarnessError> {
    let mut ledger = ConversionLedger::new();
    let started = Instant::now();
    let mismatch = run_fixture_operation(fixture, &mut ledger).err();
    let elapsed_us = (started.elapsed().as_micros() as u64).max(1);

    Ok(CaseResult {
        packet_id: fixture.packet_id.clone(),
        case_id: fixture.case_id.clone(),
        operation: fixture.operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        elapsed_us,
        ledger_records: ledger.len(),
    })
}

fn require<'f, T>(value: Option<&'f T>, field: &str) -> Result<&'f T, String> {
    value.ok_or_else(|| format!("fixture is missing `{field}`"))
}

fn datelikes(values: &[FixtureDatelike]) -> Result<Vec<DateLike>, String> {
    values.iter().map(FixtureDatelike::to_datelike).collect()
}

fn nanos_or_nat(values: &[Option<i64>]) -> Vec<i64> {
    values.iter().map(|v| v.unwrap_or(NAT)).collect()
}

fn run_fixture_operation(
    fixture: &PacketFixture,
    ledger: &mut ConversionLedger,
) -> Result<(), String> {
    let outcome: Result<Outcome, String> = match fixture.operation {
        FixtureOperation::ArrayToDatetime => {
            let values = datelikes(require(fixture.values.as_ref(), "values")?)?;
            array_to_datetime_with(
                &values,
                &fixture.options,
                &FormatListParser::new(),
                Some(&mut *ledger),
            )
            .map(Outcome::Array)
            .map_err(|err| err.to_string())
        }
        FixtureOperation::ArrayWithUnitToDatetime => {
            let unit = require(fixture.unit.as_ref(), "unit")?;
            let numeric = require(fixture.numeric.as_ref(), "numeric")?;
            let objects;
            let input = match numeric {
                FixtureNumeric::Int64(values) => NumericInput::Int64(values),
                FixtureNumeric::Float64(values) => NumericInput::Float64(values),
                FixtureNumeric::Object(values) => {
                    objects = datelikes(values)?;
                    NumericInput::Object(&objects)
                }
            };
            array_with_unit_to_datetime_with_ledger(input, unit, fixture.errors, Some(&mut *ledger))
                .map(Outcome::Array)
                .map_err(|err| err.to_string())
        }
        FixtureOperation::FormatArrayFromDatetime => {
            let nanos = nanos_or_nat(require(fixture.nanos.as_ref(), "nanos")?);
            let options = fixture.format_options.clone().unwrap_or_default();
            Ok(Outcome::Strings(format_array_from_datetime(&nanos, &options)))
        }
        FixtureOperation::IntsToPydatetime => {
            let nanos = nanos_or_nat(require(fixture.nanos.as_ref(), "nanos")?);
            ints_to_pydatetime(&nanos, fixture.tz.as_ref(), fixture.freq.as_deref(), fixture.box_kind)
                .map(|boxed| Outcome::Strings(boxed.iter().map(render_boxed).collect()))
                .map_err(|err| err.to_string())
        }
    };

    if let Some(expected_len) = fixture.expected_ledger_len
        && ledger.len() != expected_len
    {
        return Err(format!(
            "ledger mismatch: expected {expected_len} records, got {}",
            ledger.len()
        ));
    }

    match (outcome, fixture.expected_error_contains.as_deref()) {
        (Err(actual), Some(needle)) if actual.contains(needle) => Ok(()),
        (Err(actual), Some(needle)) => Err(format!(
            "error mismatch: expected message containing {needle:?}, got {actual:?}"
        )),
        (Err(actual), None) => Err(format!("unexpected error: {actual}")),
        (Ok(outcome), Some(needle)) => Err(format!(
            "expected an error containing {needle:?}, got {outcome:?}"
        )),
        (Ok(outcome), None) => compare_outcome(fixture, &outcome),
    }
}

#[derive(Debug)]
enum Outcome {
    Array(DatetimeArray),
    Strings(Vec<String>),
}

fn compare_outcome(fixture: &PacketFixture, outcome: &Outcome) -> Result<(), String> {
    match outcome {
        Outcome::Array(DatetimeArray::Int64 { values, tz }) => {
            let expected = require(fixture.expected_values.as_ref(), "expected_values")?;
            let expected = nanos_or_nat(expected);
            if *values != expected {
                return Err(format!("value mismatch: expected {expected:?}, got {values:?}"));
            }
            let actual_tz = tz.map(|offset| offset.local_minus_utc());
            if actual_tz != fixture.expected_tz_seconds {
                return Err(format!(
                    "offset mismatch: expected {:?}, got {actual_tz:?}",
                    fixture.expected_tz_seconds
                ));
            }
            Ok(())
        }
        Outcome::Array(DatetimeArray::Object(values)) => {
            let expected = require(fixture.expected_object.as_ref(), "expected_object")?;
            let expected = datelikes(expected)?;
            if !same_objects(values, &expected) {
                return Err(format!("object mismatch: expected {expected:?}, got {values:?}"));
            }
            Ok(())
        }
        Outcome::Strings(strings) => {
            let expected = require(fixture.expected_strings.as_ref(), "expected_strings")?;
            if strings != expected {
                return Err(format!("string mismatch: expected {expected:?}, got {strings:?}"));
            }
            Ok(())
        }
    }
}

/// Element-wise equality that treats NaN floats as equal.
fn same_objects(actual: &[DateLike], expected: &[DateLike]) -> bool {
    actual.len() == expected.len()
        && actual.iter().zip(expected).all(|pair| match pair {
            (DateLike::Float(a), DateLike::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (a, b) => a == b,
        })
}

/// A stable string form of a boxed value for fixture comparison.
#[must_use]
pub fn render_boxed(boxed: &BoxedDatetime) -> String {
    match boxed {
        BoxedDatetime::NaT => "NaT".to_owned(),
        BoxedDatetime::Datetime { wall, tz } => match tz {
            Some(tz) => format!("{wall} [{tz}]"),
            None => wall.to_string(),
        },
        BoxedDatetime::Timestamp(ts) => match &ts.freq {
            Some(freq) => format!("{ts} freq={freq}"),
            None => ts.to_string(),
        },
        BoxedDatetime::Date(date) => date.to_string(),
        BoxedDatetime::Time { time, tz } => match tz {
            Some(tz) => format!("{time} [{tz}]"),
            None => time.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CaseStatus, FixtureOperation, HarnessConfig, HarnessError, parse_fixture, run_packet_by_id,
        run_packet_suite, run_packets_grouped,
    };

    #[test]
    fn packet_suite_is_green() {
        let cfg = HarnessConfig::default_paths();
        let report = run_packet_suite(&cfg).expect("suite should run");
        assert!(report.fixture_count >= 10, "expected packet fixtures");
        assert!(report.is_green(), "expected report green: {:?}", report.failures());
    }

    #[test]
    fn packet_filter_runs_only_requested_packet() {
        let cfg = HarnessConfig::default_paths();
        let report = run_packet_by_id(&cfg, "FP-DT-001").expect("report");
        assert_eq!(report.packet_id.as_deref(), Some("FP-DT-001"));
        assert!(report.fixture_count >= 3);
        assert!(report
            .results
            .iter()
            .all(|result| result.operation == FixtureOperation::ArrayToDatetime));
        assert!(report.is_green(), "{:?}", report.failures());
    }

    #[test]
    fn grouped_reports_cover_every_packet() {
        let cfg = HarnessConfig::default_paths();
        let reports = run_packets_grouped(&cfg).expect("grouped");
        let ids: Vec<_> = reports
            .iter()
            .filter_map(|report| report.packet_id.as_deref())
            .collect();
        for id in ["FP-DT-001", "FP-DT-002", "FP-DT-003", "FP-DT-004"] {
            assert!(ids.contains(&id), "missing packet {id}");
        }
        assert!(reports.iter().all(|report| report.is_green()));
    }

    #[test]
    fn missing_fixture_root_yields_empty_report() {
        let cfg = HarnessConfig {
            fixture_root: std::env::temp_dir().join("fp-conformance-no-such-dir"),
        };
        let report = run_packet_suite(&cfg).expect("empty suite");
        assert_eq!(report.fixture_count, 0);
        assert!(!report.is_green());
    }

    #[test]
    fn wrong_expectation_is_reported_as_failure() {
        let fixture = parse_fixture(
            r#"{
                "packet_id": "FP-DT-X",
                "case_id": "wrong",
                "operation": "array_to_datetime",
                "values": [{"kind": "str", "value": "2021-01-01"}],
                "expected_values": [0]
            }"#,
        )
        .expect("fixture parses");
        let result = super::run_fixture(&fixture).expect("runs");
        assert_eq!(result.status, CaseStatus::Fail);
        assert!(result.mismatch.as_deref().is_some_and(|m| m.contains("value mismatch")));
    }

    #[test]
    fn malformed_fixture_is_a_json_error() {
        let err = parse_fixture("{\"packet_id\": 1}");
        assert!(matches!(err, Err(HarnessError::Json(_))));
    }
}
