//! Typed regression specifications.
//!
//! A [`ModelSpec`] enumerates the optional terms of the triple-difference
//! equation (absorbed fixed effects, demographic controls, unemployment ×
//! group, minimum wage × group). Design builders consume it directly, so
//! no regression is ever assembled from strings at fit time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A categorical factor that can be absorbed or interacted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Factor {
    /// The panel's unit id.
    Unit,
    /// The panel's cluster id.
    Cluster,
    /// The time period.
    Time,
    /// The triple-difference group indicator.
    Group,
    /// A named categorical column.
    Column(String),
}

impl FromStr for Factor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Validation("empty fixed-effect factor".into()));
        }
        Ok(match s {
            "unit" => Factor::Unit,
            "cluster" => Factor::Cluster,
            "time" => Factor::Time,
            "group" => Factor::Group,
            other => Factor::Column(other.to_string()),
        })
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factor::Unit => f.write_str("unit"),
            Factor::Cluster => f.write_str("cluster"),
            Factor::Time => f.write_str("time"),
            Factor::Group => f.write_str("group"),
            Factor::Column(c) => f.write_str(c),
        }
    }
}

/// One absorbed fixed effect: a single factor or an interaction (`a#b`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AbsorbTerm {
    factors: Vec<Factor>,
}

impl AbsorbTerm {
    /// Term from explicit factors.
    pub fn new(factors: Vec<Factor>) -> Result<Self> {
        if factors.is_empty() {
            return Err(Error::Validation("absorb term needs at least one factor".into()));
        }
        Ok(Self { factors })
    }

    /// Factors interacted in this term.
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }
}

impl FromStr for AbsorbTerm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let factors = s.split('#').map(Factor::from_str).collect::<Result<Vec<_>>>()?;
        Self::new(factors)
    }
}

impl TryFrom<String> for AbsorbTerm {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AbsorbTerm> for String {
    fn from(t: AbsorbTerm) -> String {
        t.to_string()
    }
}

impl fmt::Display for AbsorbTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.factors.iter().map(Factor::to_string).collect();
        f.write_str(&parts.join("#"))
    }
}

/// Parse a whitespace-separated absorb string, e.g.
/// `"cluster#group time#group cluster#time"`.
pub fn parse_absorb(s: &str) -> Result<Vec<AbsorbTerm>> {
    s.split_whitespace().map(AbsorbTerm::from_str).collect()
}

/// A regressor other than the treatment indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTerm {
    /// Numeric column entering linearly.
    Covariate(String),
    /// Numeric column interacted with the group indicator.
    ByGroup(String),
}

impl ControlTerm {
    /// Coefficient name used in fit output.
    pub fn label(&self) -> String {
        match self {
            ControlTerm::Covariate(c) => c.clone(),
            ControlTerm::ByGroup(c) => format!("{c}#group"),
        }
    }

    /// Source column.
    pub fn column(&self) -> &str {
        match self {
            ControlTerm::Covariate(c) | ControlTerm::ByGroup(c) => c,
        }
    }
}

/// Regression specification for one row of the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Human-readable label, used in reports and error messages.
    pub label: String,
    /// Absorbed fixed effects.
    #[serde(default)]
    pub absorb: Vec<AbsorbTerm>,
    /// Demographic controls (numeric columns).
    #[serde(default)]
    pub demographics: Vec<String>,
    /// Unemployment-rate column, interacted with the group indicator.
    #[serde(default)]
    pub unemployment: Option<String>,
    /// Minimum-wage column, interacted with the group indicator.
    #[serde(default)]
    pub minimum_wage: Option<String>,
}

impl ModelSpec {
    /// Spec with no absorbed effects and no controls.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            absorb: Vec::new(),
            demographics: Vec::new(),
            unemployment: None,
            minimum_wage: None,
        }
    }

    /// Set absorbed fixed effects from an absorb string.
    pub fn with_absorb(mut self, absorb: &str) -> Result<Self> {
        self.absorb = parse_absorb(absorb)?;
        Ok(self)
    }

    /// Set demographic controls.
    pub fn with_demographics<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.demographics = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Add the unemployment × group control.
    pub fn with_unemployment(mut self, col: impl Into<String>) -> Self {
        self.unemployment = Some(col.into());
        self
    }

    /// Add the minimum wage × group control.
    pub fn with_minimum_wage(mut self, col: impl Into<String>) -> Self {
        self.minimum_wage = Some(col.into());
        self
    }

    /// All control terms in a stable order.
    pub fn control_terms(&self) -> Vec<ControlTerm> {
        let mut terms: Vec<ControlTerm> =
            self.demographics.iter().cloned().map(ControlTerm::Covariate).collect();
        if let Some(u) = &self.unemployment {
            terms.push(ControlTerm::ByGroup(u.clone()));
        }
        if let Some(m) = &self.minimum_wage {
            terms.push(ControlTerm::ByGroup(m.clone()));
        }
        terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interactions() {
        let terms = parse_absorb("cluster#group  time#group region").unwrap();
        assert_eq!(terms.len(), 3);
        assert_eq!(terms[0].factors(), &[Factor::Cluster, Factor::Group]);
        assert_eq!(terms[2].factors(), &[Factor::Column("region".into())]);
        assert_eq!(terms[1].to_string(), "time#group");
    }

    #[test]
    fn parse_rejects_empty_factor() {
        assert!(parse_absorb("cluster##time").is_err());
    }

    #[test]
    fn control_terms_order() {
        let spec = ModelSpec::new("full")
            .with_demographics(["age", "educ"])
            .with_unemployment("urate")
            .with_minimum_wage("minwage");
        let labels: Vec<String> = spec.control_terms().iter().map(ControlTerm::label).collect();
        assert_eq!(labels, vec!["age", "educ", "urate#group", "minwage#group"]);
    }

    #[test]
    fn spec_deserializes_absorb_strings() {
        let json = r#"{"label":"fe","absorb":["cluster#time","group"]}"#;
        let spec: ModelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.absorb.len(), 2);
        assert_eq!(spec.absorb[0].factors(), &[Factor::Cluster, Factor::Time]);
        assert!(spec.unemployment.is_none());
    }
}
