use crate::{
    catalog::{Catalog, LoadWarning},
    error::ValidationError,
    fsutil,
};
use serde::Serialize;
use std::collections::HashMap;

/// Checks that the whole installed set can be deployed: no duplicate or
/// unusable ids were seen at load, and no two mods claim the same override
/// target.
/// Stops at the first problem.
pub fn validate(catalog: &Catalog, warnings: &[LoadWarning]) -> Result<(), ValidationError> {
    for warning in warnings {
        if let LoadWarning::DuplicateId { id } = warning {
            return Err(ValidationError::DuplicateId(id.clone()));
        }
    }
    for warning in warnings {
        if let LoadWarning::InvalidId { id, reason } = warning {
            return Err(ValidationError::InvalidId {
                id: id.clone(),
                reason: *reason,
            });
        }
    }

    let mut claimed: HashMap<String, &str> = HashMap::new();
    for mod_entry in catalog.iter() {
        for file in &mod_entry.override_files {
            let key = fsutil::normalized_key(&file.target);
            if let Some(owner) = claimed.get(&key) {
                return Err(ValidationError::Conflict {
                    target: key,
                    first_mod: owner.to_string(),
                    second_mod: mod_entry.id.clone(),
                });
            }
            claimed.insert(key, &mod_entry.id);
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub target: String,
    /// Claiming mods in catalog order. A mod that lists the same target
    /// twice appears once.
    pub mod_ids: Vec<String>,
}

/// Every contested override target, sorted by target path. Targets that
/// resolve to the same file are reported under their normalized form.
pub fn scan_conflicts(catalog: &Catalog) -> Vec<Conflict> {
    let mut owners: HashMap<String, (usize, Vec<String>)> = HashMap::new();
    for mod_entry in catalog.iter() {
        for file in &mod_entry.override_files {
            let key = fsutil::normalized_key(&file.target);
            let (claims, ids) = owners.entry(key).or_default();
            *claims += 1;
            if !ids.contains(&mod_entry.id) {
                ids.push(mod_entry.id.clone());
            }
        }
    }

    let mut conflicts: Vec<Conflict> = owners
        .into_iter()
        .filter(|(_, (claims, _))| *claims > 1)
        .map(|(target, (_, mod_ids))| Conflict {
            target,
            mod_ids,
        })
        .collect();
    conflicts.sort_by(|a, b| a.target.cmp(&b.target));
    conflicts
}
