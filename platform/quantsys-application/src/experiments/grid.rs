//! Parameter grids over a base TOML config.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Keys a sweep may not override: runs share one feed and derive their ids.
const PINNED_KEYS: [&str; 4] = [
    "run.run_id",
    "run.instruments",
    "paths.events_path",
    "paths.out_dir",
];

const RUN_HASH_LEN: usize = 12;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepParam {
    pub path: String,
    pub values: Vec<toml::Value>,
}

/// Dotted config path to the value chosen for one run.
pub type Assignment = BTreeMap<String, toml::Value>;

/// Cartesian product of the sweep params. The first param varies slowest.
#[derive(Debug, Clone)]
pub struct ParamGrid {
    params: Vec<SweepParam>,
}

impl ParamGrid {
    pub fn new(params: &[SweepParam]) -> Result<Self, String> {
        for param in params {
            let path = param.path.trim();
            if path.is_empty() {
                return Err("sweep param path cannot be empty".to_string());
            }
            if PINNED_KEYS.iter().any(|key| path.starts_with(key)) {
                return Err(format!("sweep param path not allowed: {path}"));
            }
            if param.values.is_empty() {
                return Err(format!("sweep param has no values: {path}"));
            }
        }
        Ok(Self {
            params: params.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.params
            .iter()
            .fold(1usize, |acc, param| acc.saturating_mul(param.values.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn assignment(&self, index: usize) -> Assignment {
        let mut rest = index;
        let mut assignment = Assignment::new();
        for param in self.params.iter().rev() {
            let choices = param.values.len();
            assignment.insert(param.path.trim().to_string(), param.values[rest % choices].clone());
            rest /= choices;
        }
        assignment
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        (0..self.len()).map(|index| self.assignment(index)).collect()
    }
}

/// `<sweep>__<hash>__<split>`; the hash covers the split and the assignment.
pub fn run_id_for(sweep_id: &str, split_id: &str, assignment: &Assignment) -> String {
    let canonical = serde_json::to_string(assignment).unwrap_or_default();
    let digest = Sha256::new()
        .chain_update(split_id.as_bytes())
        .chain_update(b"\n")
        .chain_update(canonical.as_bytes())
        .finalize();

    let mut hash = String::with_capacity(RUN_HASH_LEN);
    for byte in digest.iter().take(RUN_HASH_LEN / 2) {
        let _ = write!(hash, "{byte:02x}");
    }
    format!("{sweep_id}__{hash}__{split_id}")
}

/// Writes `assignment` and the run id into a copy of `base`.
pub fn render_config(
    base: &toml::Table,
    assignment: &Assignment,
    run_id: &str,
) -> Result<toml::Table, String> {
    let mut doc = base.clone();
    for (path, value) in assignment {
        override_key(&mut doc, path, value.clone())?;
    }
    override_key(&mut doc, "run.run_id", toml::Value::String(run_id.to_string()))?;
    Ok(doc)
}

/// Parent tables must already exist; a typo in a sweep path is an error,
/// not a new table.
pub fn override_key(doc: &mut toml::Table, path: &str, value: toml::Value) -> Result<(), String> {
    let keys: Vec<&str> = path
        .split('.')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .collect();
    let Some((leaf, parents)) = keys.split_last() else {
        return Err("empty path".to_string());
    };

    let mut table = doc;
    for key in parents {
        table = match table.get_mut(*key) {
            Some(toml::Value::Table(inner)) => inner,
            Some(_) => return Err(format!("path is not a table: {path}")),
            None => return Err(format!("path not found: {path}")),
        };
    }
    table.insert((*leaf).to_string(), value);
    Ok(())
}
