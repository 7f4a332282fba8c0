//! Feature encoding shared by the propensity and outcome models.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};

/// Dense row-major design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: Vec<Vec<f64>>,
    width: usize,
}

impl FeatureMatrix {
    pub fn new(rows: Vec<Vec<f64>>, width: usize) -> Self {
        Self { rows, width }
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub column: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericEncoding {
    pub column: String,
    pub mean: f64,
    pub scale: f64,
}

/// One-hot categorical columns followed by z-scored numeric columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    pub categorical: Vec<CategoricalEncoding>,
    pub numeric: Vec<NumericEncoding>,
}

impl FeatureEncoder {
    pub fn fit(dataset: &Dataset, config: &EngineConfig) -> EngineResult<Self> {
        let mut categorical = Vec::with_capacity(config.categorical_features.len());
        for name in &config.categorical_features {
            let column = dataset
                .column(name)
                .ok_or_else(|| EngineError::dataset(format!("missing column '{name}'")))?;
            let categories: BTreeSet<String> = (0..dataset.row_count())
                .filter_map(|row| column.string_value(row))
                .collect();
            categorical.push(CategoricalEncoding {
                column: name.clone(),
                categories: categories.into_iter().collect(),
            });
        }

        let mut numeric = Vec::with_capacity(config.numeric_features.len());
        for name in &config.numeric_features {
            let values = dataset.numeric(name)?;
            let count = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / count;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
            let std = variance.sqrt();
            numeric.push(NumericEncoding {
                column: name.clone(),
                mean,
                scale: if std > f64::EPSILON { std } else { 1.0 },
            });
        }

        Ok(Self {
            categorical,
            numeric,
        })
    }

    pub fn width(&self) -> usize {
        self.categorical
            .iter()
            .map(|encoding| encoding.categories.len())
            .sum::<usize>()
            + self.numeric.len()
    }

    /// Unknown categories encode as all zeros.
    pub fn transform(&self, dataset: &Dataset) -> EngineResult<FeatureMatrix> {
        let width = self.width();
        let mut rows = vec![Vec::with_capacity(width); dataset.row_count()];

        for encoding in &self.categorical {
            let column = dataset.column(&encoding.column).ok_or_else(|| {
                EngineError::dataset(format!("missing column '{}'", encoding.column))
            })?;
            for (row, out) in rows.iter_mut().enumerate() {
                let value = column.string_value(row);
                for category in &encoding.categories {
                    let hit = value.as_deref() == Some(category.as_str());
                    out.push(if hit { 1.0 } else { 0.0 });
                }
            }
        }

        for encoding in &self.numeric {
            let values = dataset.numeric(&encoding.column)?;
            for (out, value) in rows.iter_mut().zip(values) {
                out.push((value - encoding.mean) / encoding.scale);
            }
        }

        Ok(FeatureMatrix::new(rows, width))
    }
}
