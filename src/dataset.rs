//! Logged unit records, stored column-wise.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Categorical(Vec<Option<String>>),
    Numeric(Vec<Option<f64>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Categorical(values) => values.len(),
            Self::Numeric(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_null(&self) -> Option<usize> {
        match self {
            Self::Categorical(values) => values.iter().position(Option::is_none),
            Self::Numeric(values) => values.iter().position(Option::is_none),
        }
    }

    /// String-cast value of `row`, `None` when null.
    pub fn string_value(&self, row: usize) -> Option<String> {
        match self {
            Self::Categorical(values) => values.get(row).cloned().flatten(),
            Self::Numeric(values) => values.get(row).copied().flatten().map(|v| v.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    row_count: usize,
    treatment_column: String,
    columns: BTreeMap<String, Column>,
}

impl Dataset {
    /// Builds the column store for every column the config names. Columns no
    /// record mentions are left out so [`Dataset::validate`] can report them.
    pub fn from_records(config: &EngineConfig, records: &[Record]) -> EngineResult<Self> {
        let numeric: BTreeSet<&str> = config
            .numeric_features
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(config.treatment.column.as_str()))
            .chain(config.outcomes.iter().map(|spec| spec.column.as_str()))
            .collect();

        let mut columns = BTreeMap::new();
        for name in config.required_columns() {
            if !records.iter().any(|record| record.contains_key(&name)) {
                continue;
            }

            let column = if numeric.contains(name.as_str()) {
                let mut values = Vec::with_capacity(records.len());
                for (row, record) in records.iter().enumerate() {
                    values.push(numeric_cell(record.get(&name), &name, row)?);
                }
                Column::Numeric(values)
            } else {
                let mut values = Vec::with_capacity(records.len());
                for (row, record) in records.iter().enumerate() {
                    values.push(categorical_cell(record.get(&name), &name, row)?);
                }
                Column::Categorical(values)
            };
            columns.insert(name, column);
        }

        Ok(Self {
            row_count: records.len(),
            treatment_column: config.treatment.column.clone(),
            columns,
        })
    }

    /// Reads one JSON object per line; blank lines are skipped.
    pub fn load_jsonl(path: &Path, config: &EngineConfig) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line).with_context(|| {
                format!("invalid JSON object at {}:{}", path.display(), index + 1)
            })?;
            records.push(record);
        }

        debug!(path = %path.display(), rows = records.len(), "parsed dataset records");
        Ok(Self::from_records(config, &records)?)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Schema checks that must pass before any model is fitted.
    pub fn validate(&self, config: &EngineConfig) -> EngineResult<()> {
        let missing: Vec<String> = config
            .required_columns()
            .into_iter()
            .filter(|name| !self.columns.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::dataset(format!(
                "dataset is missing required columns: {missing:?}"
            )));
        }

        if self.row_count == 0 {
            return Err(EngineError::dataset("dataset has no rows"));
        }

        let levels: BTreeSet<i64> = config.levels().into_iter().collect();
        let unexpected: BTreeSet<i64> = self
            .treatments()?
            .into_iter()
            .filter(|level| !levels.contains(level))
            .collect();
        if !unexpected.is_empty() {
            return Err(EngineError::dataset(format!(
                "dataset contains treatment levels outside configured levels: {:?}",
                unexpected.into_iter().collect::<Vec<_>>()
            )));
        }

        for spec in &config.segmentations {
            if let Some(row) = self.columns.get(&spec.column).and_then(Column::first_null) {
                return Err(EngineError::NullSegmentValue {
                    column: spec.column.clone(),
                    row,
                });
            }
        }

        let value_columns = config
            .feature_columns()
            .into_iter()
            .chain(config.outcomes.iter().map(|spec| spec.column.clone()));
        for name in value_columns {
            if let Some(row) = self.columns.get(&name).and_then(Column::first_null) {
                return Err(EngineError::dataset(format!(
                    "column '{name}' contains a null value at row {row}"
                )));
            }
        }

        Ok(())
    }

    /// Assigned treatment level per row.
    pub fn treatments(&self) -> EngineResult<Vec<i64>> {
        let values = self.numeric(&self.treatment_column)?;
        values
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                if value.fract() == 0.0 && value.is_finite() {
                    Ok(value as i64)
                } else {
                    Err(EngineError::dataset(format!(
                        "treatment column '{}' has non-integer value {value} at row {row}",
                        self.treatment_column
                    )))
                }
            })
            .collect()
    }

    /// Non-null numeric column.
    pub fn numeric(&self, name: &str) -> EngineResult<Vec<f64>> {
        match self.columns.get(name) {
            Some(Column::Numeric(values)) => values
                .iter()
                .enumerate()
                .map(|(row, value)| {
                    value.ok_or_else(|| {
                        EngineError::dataset(format!(
                            "column '{name}' contains a null value at row {row}"
                        ))
                    })
                })
                .collect(),
            Some(Column::Categorical(_)) => Err(EngineError::dataset(format!(
                "column '{name}' is categorical, expected numeric"
            ))),
            None => Err(EngineError::dataset(format!("missing column '{name}'"))),
        }
    }
}

fn numeric_cell(value: Option<&Value>, column: &str, row: usize) -> EngineResult<Option<f64>> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::Bool(flag)) => Some(if *flag { 1.0 } else { 0.0 }),
        Some(Value::String(raw)) => Some(raw.trim().parse::<f64>().map_err(|_| {
            EngineError::dataset(format!(
                "column '{column}' has non-numeric value '{raw}' at row {row}"
            ))
        })?),
        Some(other) => {
            return Err(EngineError::dataset(format!(
                "column '{column}' has unsupported value {other} at row {row}"
            )));
        }
    };

    match parsed {
        Some(number) if number.is_finite() => Ok(Some(number)),
        Some(number) => Err(EngineError::dataset(format!(
            "column '{column}' has non-finite value {number} at row {row}"
        ))),
        None => Err(EngineError::dataset(format!(
            "column '{column}' has a number outside the f64 range at row {row}"
        ))),
    }
}

fn categorical_cell(
    value: Option<&Value>,
    column: &str,
    row: usize,
) -> EngineResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.clone())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(other) => Err(EngineError::dataset(format!(
            "column '{column}' has unsupported value {other} at row {row}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testkit;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn validate_accepts_generated_logs() {
        let config = EngineConfig::guardrail();
        let dataset = testkit::guardrail_dataset(300, 5);
        dataset.validate(&config).expect("generated logs are valid");
        assert_eq!(dataset.row_count(), 300);
    }

    #[test]
    fn validate_reports_missing_columns() {
        let config = EngineConfig::guardrail();
        let mut records = testkit::guardrail_records(20, 3);
        for record in &mut records {
            record.remove("latency_ms");
        }
        let dataset = Dataset::from_records(&config, &records).expect("column store");

        let err = dataset.validate(&config).expect_err("latency_ms is missing");
        assert!(matches!(err, EngineError::DatasetValidation { .. }));
        assert!(err.to_string().contains("latency_ms"));
    }

    #[test]
    fn validate_rejects_treatment_outside_level_set() {
        let config = EngineConfig::guardrail();
        let mut records = testkit::guardrail_records(20, 3);
        records[4].insert("policy_level".to_string(), json!(9));
        let dataset = Dataset::from_records(&config, &records).expect("column store");

        let err = dataset.validate(&config).expect_err("level 9 is not configured");
        assert!(err.to_string().contains("[9]"));
    }

    #[test]
    fn validate_rejects_null_segment_column() {
        let config = EngineConfig::guardrail();
        let mut records = testkit::guardrail_records(20, 3);
        records[7].insert("prompt_risk".to_string(), Value::Null);
        let dataset = Dataset::from_records(&config, &records).expect("column store");

        assert_eq!(
            dataset.validate(&config),
            Err(EngineError::NullSegmentValue {
                column: "prompt_risk".to_string(),
                row: 7,
            })
        );
    }

    #[test]
    fn numeric_segment_values_are_string_cast() {
        let column = Column::Numeric(vec![Some(3.0), Some(2.5), None]);
        assert_eq!(column.string_value(0).as_deref(), Some("3"));
        assert_eq!(column.string_value(1).as_deref(), Some("2.5"));
        assert_eq!(column.string_value(2), None);
        assert_eq!(column.first_null(), Some(2));
    }

    #[test]
    fn cells_accept_booleans_and_numeric_strings() {
        let config = EngineConfig::discount();
        let records = vec![record(json!({
            "loyalty_tier": "G1",
            "device": "mobile",
            "region": "EU",
            "price_sensitivity": 2,
            "trip_type": "leisure",
            "lead_time": "14.5",
            "base_price": 120.0,
            "nights": 2,
            "search_intensity": 3.0,
            "discount_pct": 5,
            "booked": true,
            "net_value": 80.5,
        }))];

        let dataset = Dataset::from_records(&config, &records).expect("column store");
        dataset.validate(&config).expect("single row is valid");
        assert_eq!(dataset.numeric("booked").expect("booked"), vec![1.0]);
        assert_eq!(dataset.numeric("lead_time").expect("lead_time"), vec![14.5]);
        assert_eq!(
            dataset
                .column("price_sensitivity")
                .and_then(|column| column.string_value(0))
                .as_deref(),
            Some("2")
        );
    }

    #[test]
    fn non_finite_numeric_strings_are_rejected() {
        let config = EngineConfig::guardrail();
        for raw in ["NaN", "inf", "-infinity"] {
            let mut records = testkit::guardrail_records(20, 3);
            records[5].insert("latency_ms".to_string(), json!(raw));

            let err = Dataset::from_records(&config, &records).expect_err("non-finite cell");
            assert!(matches!(err, EngineError::DatasetValidation { .. }));
            let message = err.to_string();
            assert!(message.contains("'latency_ms'"), "{message}");
            assert!(message.contains("row 5"), "{message}");
        }
    }

    #[test]
    fn load_jsonl_skips_blank_lines() {
        let config = EngineConfig::guardrail();
        let records = testkit::guardrail_records(4, 9);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs.jsonl");

        let mut body = String::new();
        for record in &records {
            body.push_str(&serde_json::to_string(record).expect("record json"));
            body.push_str("\n\n");
        }
        std::fs::write(&path, body).expect("write logs");

        let dataset = Dataset::load_jsonl(&path, &config).expect("load logs");
        assert_eq!(dataset.row_count(), 4);
        dataset.validate(&config).expect("valid logs");
    }
}
