//! Immutable columnar panel.
//!
//! A [`Panel`] holds the role columns every procedure needs (unit, cluster,
//! time, treatment, group, weight) plus named numeric and categorical
//! columns. Every transformation returns a new panel; nothing mutates in
//! place, so a base panel can be shared read-only across parallel draws.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One row of the cleaned input table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Unit identifier (e.g. state, or state × demographic cell).
    pub unit: u64,
    /// Cluster identifier. Must be constant within a unit.
    pub cluster: u64,
    /// Time period (e.g. survey year).
    pub time: i64,
    /// Treatment indicator (0/1), monotone per unit after onset.
    pub treated: u8,
    /// Triple-difference group indicator (0/1).
    #[serde(default)]
    pub group: u8,
    /// Analysis weight (≥ 0).
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Named numeric values: outcomes, covariates, eligibility flags.
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Named categorical values used as fixed-effect factors.
    #[serde(default)]
    pub categories: BTreeMap<String, u64>,
}

fn default_weight() -> f64 {
    1.0
}

/// On-disk panel document: `{ "observations": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelRecords {
    /// All observations, any order.
    pub observations: Vec<Observation>,
}

/// Read-only columnar panel.
#[derive(Debug, Clone)]
pub struct Panel {
    unit: Vec<u64>,
    cluster: Vec<u64>,
    time: Vec<i64>,
    treated: Vec<u8>,
    group: Vec<u8>,
    weight: Vec<f64>,
    numeric: BTreeMap<String, Vec<f64>>,
    categorical: BTreeMap<String, Vec<u64>>,
}

impl Panel {
    /// Build a panel from its role columns.
    ///
    /// Validates lengths, 0/1 indicators, non-negative finite weights,
    /// unit ⊂ cluster nesting and monotone treatment per unit.
    pub fn new(
        unit: Vec<u64>,
        cluster: Vec<u64>,
        time: Vec<i64>,
        treated: Vec<u8>,
        group: Vec<u8>,
        weight: Vec<f64>,
    ) -> Result<Self> {
        let n = unit.len();
        if n == 0 {
            return Err(Error::Validation("panel must be non-empty".into()));
        }
        for (name, len) in [
            ("cluster", cluster.len()),
            ("time", time.len()),
            ("treated", treated.len()),
            ("group", group.len()),
            ("weight", weight.len()),
        ] {
            if len != n {
                return Err(Error::Validation(format!("{name} length ({len}) != n ({n})")));
            }
        }
        if treated.iter().chain(group.iter()).any(|&v| v > 1) {
            return Err(Error::Validation("treated and group must be 0 or 1".into()));
        }
        if let Some(w) = weight.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
            return Err(Error::Validation(format!("weights must be finite and >= 0, got {w}")));
        }

        let panel = Self {
            unit,
            cluster,
            time,
            treated,
            group,
            weight,
            numeric: BTreeMap::new(),
            categorical: BTreeMap::new(),
        };
        panel.check_nesting()?;
        panel.check_monotone_treatment()?;
        Ok(panel)
    }

    /// Build a panel from row records. Every row must carry the same value
    /// and category keys.
    pub fn from_observations(rows: &[Observation]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| Error::Validation("panel must be non-empty".into()))?;
        let value_keys: Vec<&String> = first.values.keys().collect();
        let category_keys: Vec<&String> = first.categories.keys().collect();

        let mut numeric: BTreeMap<String, Vec<f64>> =
            value_keys.iter().map(|k| ((*k).clone(), Vec::with_capacity(rows.len()))).collect();
        let mut categorical: BTreeMap<String, Vec<u64>> =
            category_keys.iter().map(|k| ((*k).clone(), Vec::with_capacity(rows.len()))).collect();

        for (i, row) in rows.iter().enumerate() {
            if row.values.len() != value_keys.len() || row.categories.len() != category_keys.len()
            {
                return Err(Error::Validation(format!(
                    "row {i}: columns differ from the first row"
                )));
            }
            for (k, col) in numeric.iter_mut() {
                let v = row
                    .values
                    .get(k)
                    .ok_or_else(|| Error::Validation(format!("row {i}: missing value '{k}'")))?;
                col.push(*v);
            }
            for (k, col) in categorical.iter_mut() {
                let v = row
                    .categories
                    .get(k)
                    .ok_or_else(|| Error::Validation(format!("row {i}: missing category '{k}'")))?;
                col.push(*v);
            }
        }

        let mut panel = Self::new(
            rows.iter().map(|r| r.unit).collect(),
            rows.iter().map(|r| r.cluster).collect(),
            rows.iter().map(|r| r.time).collect(),
            rows.iter().map(|r| r.treated).collect(),
            rows.iter().map(|r| r.group).collect(),
            rows.iter().map(|r| r.weight).collect(),
        )?;
        panel.numeric = numeric;
        panel.categorical = categorical;
        Ok(panel)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.unit.len()
    }

    /// Always false for a constructed panel; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.unit.is_empty()
    }

    /// Unit id per observation.
    pub fn units(&self) -> &[u64] {
        &self.unit
    }

    /// Cluster id per observation.
    pub fn clusters(&self) -> &[u64] {
        &self.cluster
    }

    /// Time period per observation.
    pub fn times(&self) -> &[i64] {
        &self.time
    }

    /// Treatment indicator per observation.
    pub fn treated(&self) -> &[u8] {
        &self.treated
    }

    /// Group (qualifying-child) indicator per observation.
    pub fn groups(&self) -> &[u8] {
        &self.group
    }

    /// Analysis weight per observation.
    pub fn weights(&self) -> &[f64] {
        &self.weight
    }

    /// Named numeric column.
    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        self.numeric
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Validation(format!("unknown numeric column '{name}'")))
    }

    /// Named categorical column.
    pub fn categorical(&self, name: &str) -> Result<&[u64]> {
        self.categorical
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Validation(format!("unknown categorical column '{name}'")))
    }

    /// Names of numeric columns (sorted).
    pub fn numeric_names(&self) -> impl Iterator<Item = &str> {
        self.numeric.keys().map(String::as_str)
    }

    /// Sorted distinct cluster ids.
    pub fn cluster_ids(&self) -> Vec<u64> {
        self.cluster.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Sorted distinct unit ids.
    pub fn unit_ids(&self) -> Vec<u64> {
        self.unit.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Sorted distinct time periods.
    pub fn periods(&self) -> Vec<i64> {
        self.time.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Row indices grouped by cluster id (ordered by cluster id).
    pub fn rows_by_cluster(&self) -> BTreeMap<u64, Vec<usize>> {
        let mut map: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, &c) in self.cluster.iter().enumerate() {
            map.entry(c).or_default().push(i);
        }
        map
    }

    /// Row indices grouped by unit id (ordered by unit id).
    pub fn rows_by_unit(&self) -> BTreeMap<u64, Vec<usize>> {
        let mut map: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, &u) in self.unit.iter().enumerate() {
            map.entry(u).or_default().push(i);
        }
        map
    }

    /// Cluster-level treatment assignment.
    pub fn cluster_assignment(&self) -> TreatmentAssignment {
        TreatmentAssignment::from_ids(&self.cluster, &self.time, &self.treated)
    }

    /// Unit-level treatment assignment.
    pub fn unit_assignment(&self) -> TreatmentAssignment {
        TreatmentAssignment::from_ids(&self.unit, &self.time, &self.treated)
    }

    // ------------------------------------------------------------------
    // Derivations (each returns a new panel)
    // ------------------------------------------------------------------

    /// Rows at the given indices, in order. Indices may repeat; callers that
    /// duplicate rows must relabel ids with [`Panel::with_ids`].
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        fn take<T: Copy>(v: &[T], rows: &[usize]) -> Vec<T> {
            rows.iter().map(|&i| v[i]).collect()
        }
        Self {
            unit: take(&self.unit, rows),
            cluster: take(&self.cluster, rows),
            time: take(&self.time, rows),
            treated: take(&self.treated, rows),
            group: take(&self.group, rows),
            weight: take(&self.weight, rows),
            numeric: self.numeric.iter().map(|(k, v)| (k.clone(), take(v, rows))).collect(),
            categorical: self
                .categorical
                .iter()
                .map(|(k, v)| (k.clone(), take(v, rows)))
                .collect(),
        }
    }

    /// Rows whose unit id is in `units`.
    pub fn restrict_units(&self, units: &BTreeSet<u64>) -> Self {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| units.contains(&self.unit[i])).collect();
        self.select_rows(&rows)
    }

    /// Rows with `lo <= time <= hi`.
    pub fn restrict_periods(&self, lo: i64, hi: i64) -> Result<Self> {
        let rows: Vec<usize> =
            (0..self.len()).filter(|&i| self.time[i] >= lo && self.time[i] <= hi).collect();
        if rows.is_empty() {
            return Err(Error::Validation(format!("no observations in periods {lo}..={hi}")));
        }
        Ok(self.select_rows(&rows))
    }

    /// Replace unit and cluster ids (same length), revalidating nesting.
    pub fn with_ids(&self, unit: Vec<u64>, cluster: Vec<u64>) -> Result<Self> {
        let n = self.len();
        if unit.len() != n || cluster.len() != n {
            return Err(Error::Validation("relabelled ids must match panel length".into()));
        }
        let out = Self { unit, cluster, ..self.clone() };
        out.check_nesting()?;
        Ok(out)
    }

    /// Use a categorical column (or `"unit"` / `"cluster"`) as the cluster id.
    pub fn with_cluster_from(&self, column: &str) -> Result<Self> {
        let cluster = match column {
            "cluster" => return Ok(self.clone()),
            "unit" => self.unit.clone(),
            other => self.categorical(other)?.to_vec(),
        };
        self.with_ids(self.unit.clone(), cluster)
    }

    /// Replace the treatment column, revalidating monotonicity.
    pub fn with_treatment(&self, treated: Vec<u8>) -> Result<Self> {
        if treated.len() != self.len() || treated.iter().any(|&v| v > 1) {
            return Err(Error::Validation("treatment must be 0/1 with panel length".into()));
        }
        let out = Self { treated, ..self.clone() };
        out.check_monotone_treatment()?;
        Ok(out)
    }

    /// Replace the weight column.
    pub fn with_weights(&self, weight: Vec<f64>) -> Result<Self> {
        if weight.len() != self.len() {
            return Err(Error::Validation("weights must match panel length".into()));
        }
        if weight.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(Error::Validation("weights must be finite and >= 0".into()));
        }
        Ok(Self { weight, ..self.clone() })
    }

    /// Add or replace a numeric column.
    pub fn with_numeric(&self, name: &str, values: Vec<f64>) -> Result<Self> {
        if values.len() != self.len() {
            return Err(Error::Validation(format!(
                "column '{name}' has length {}, expected {}",
                values.len(),
                self.len()
            )));
        }
        let mut out = self.clone();
        out.numeric.insert(name.to_string(), values);
        Ok(out)
    }

    /// Add or replace a categorical column.
    pub fn with_categorical(&self, name: &str, values: Vec<u64>) -> Result<Self> {
        if values.len() != self.len() {
            return Err(Error::Validation(format!(
                "column '{name}' has length {}, expected {}",
                values.len(),
                self.len()
            )));
        }
        let mut out = self.clone();
        out.categorical.insert(name.to_string(), values);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Invariants
    // ------------------------------------------------------------------

    fn check_nesting(&self) -> Result<()> {
        let mut cluster_of: HashMap<u64, u64> = HashMap::new();
        for (&u, &c) in self.unit.iter().zip(&self.cluster) {
            let prev = *cluster_of.entry(u).or_insert(c);
            if prev != c {
                return Err(Error::Validation(format!(
                    "unit {u} appears in clusters {prev} and {c}"
                )));
            }
        }
        Ok(())
    }

    fn check_monotone_treatment(&self) -> Result<()> {
        for (u, rows) in self.rows_by_unit() {
            let onset = rows.iter().filter(|&&i| self.treated[i] == 1).map(|&i| self.time[i]).min();
            let Some(t0) = onset else { continue };
            if rows.iter().any(|&i| self.time[i] >= t0 && self.treated[i] == 0) {
                return Err(Error::Validation(format!(
                    "treatment reverts to 0 after onset {t0} for unit {u}"
                )));
            }
        }
        Ok(())
    }
}

/// Ever-treated flag and onset period per id (unit or cluster).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreatmentAssignment {
    onsets: BTreeMap<u64, Option<i64>>,
}

impl TreatmentAssignment {
    fn from_ids(ids: &[u64], time: &[i64], treated: &[u8]) -> Self {
        let mut onsets: BTreeMap<u64, Option<i64>> = BTreeMap::new();
        for i in 0..ids.len() {
            let entry = onsets.entry(ids[i]).or_insert(None);
            if treated[i] == 1 {
                *entry = Some(entry.map_or(time[i], |t: i64| t.min(time[i])));
            }
        }
        Self { onsets }
    }

    /// Onset period of `id`, `None` if never treated or unknown.
    pub fn onset(&self, id: u64) -> Option<i64> {
        self.onsets.get(&id).copied().flatten()
    }

    /// Whether `id` is ever treated.
    pub fn is_treated(&self, id: u64) -> bool {
        self.onset(id).is_some()
    }

    /// Ever-treated ids, ascending.
    pub fn treated_ids(&self) -> Vec<u64> {
        self.onsets.iter().filter(|(_, o)| o.is_some()).map(|(&id, _)| id).collect()
    }

    /// Never-treated ids, ascending.
    pub fn control_ids(&self) -> Vec<u64> {
        self.onsets.iter().filter(|(_, o)| o.is_none()).map(|(&id, _)| id).collect()
    }

    /// Earliest onset among treated ids (the common policy date).
    pub fn reference_onset(&self) -> Option<i64> {
        self.onsets.values().filter_map(|o| *o).min()
    }

    /// Post-period indicator per observation relative to [`Self::reference_onset`].
    pub fn post_indicator(&self, time: &[i64]) -> Vec<u8> {
        match self.reference_onset() {
            Some(t0) => time.iter().map(|&t| u8::from(t >= t0)).collect(),
            None => vec![0; time.len()],
        }
    }
}
