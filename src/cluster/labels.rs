//! Equality-based label selectors.

use crate::core::error::{RudderError, RudderResult};
use std::collections::BTreeMap;
use std::fmt;

/// A set of `key=value` requirements; an empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Build a selector from a label map.
    pub fn from_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            requirements: labels,
        }
    }

    /// Add a requirement.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    /// Parse `k1=v1,k2==v2`.
    pub fn parse(input: &str) -> RudderResult<Self> {
        let mut selector = Self::default();
        for term in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| {
                    RudderError::invalid_request(format!("invalid selector term: {}", term))
                })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(RudderError::invalid_request(format!(
                    "invalid selector term: {}",
                    term
                )));
            }
            selector
                .requirements
                .insert(key.to_string(), value.trim().to_string());
        }
        Ok(selector)
    }

    /// Check whether `labels` satisfy every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    /// Whether the selector has no requirements.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Requirements as a map.
    pub fn requirements(&self) -> &BTreeMap<String, String> {
        &self.requirements
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.requirements {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}
