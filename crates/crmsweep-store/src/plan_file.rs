//! Merge plans saved between the dry run and the approved apply.

use std::fs;
use std::path::Path;

use crmsweep_core::{MergePlan, PlanHash};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::StoreError;

/// On-disk plan. `plan_hash` is what the dry run reported; apply recomputes
/// it from `plan` and never trusts this copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    /// CRM object type the plan's keys belong to.
    pub object_type: String,
    pub plan_hash: PlanHash,
    pub plan: MergePlan,
}

pub fn save_plan(
    path: &Path,
    object_type: &str,
    plan: &MergePlan,
    plan_hash: &PlanHash,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let file = PlanFile {
        object_type: object_type.to_string(),
        plan_hash: plan_hash.clone(),
        plan: plan.clone(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json).map_err(|e| StoreError::io(path, e))?;
    info!(path = %path.display(), groups = plan.groups.len(), %plan_hash, "saved merge plan");
    Ok(())
}

pub fn load_plan(path: &Path) -> Result<PlanFile, StoreError> {
    if !path.exists() {
        return Err(StoreError::PlanNotFound(path.to_path_buf()));
    }
    let json = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crmsweep_core::{Confidence, DuplicateGroup};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn plan() -> MergePlan {
        MergePlan {
            groups: vec![DuplicateGroup {
                members: vec!["1".into(), "2".into()],
                primary: "1".into(),
                confidence: Confidence::Strong,
                matched_fields: BTreeSet::from(["firstname".to_string(), "lastname".to_string()]),
            }],
            generated_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            source_extraction_fingerprint: "sha256:src".into(),
        }
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plans/contacts.json");
        let hash = PlanHash::new("sha256:abcd");
        save_plan(&path, "contacts", &plan(), &hash).unwrap();

        let loaded = load_plan(&path).unwrap();
        assert_eq!(loaded.plan, plan());
        assert_eq!(loaded.plan_hash, hash);
        assert_eq!(loaded.object_type, "contacts");
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"confidence\": \"STRONG\""));
    }

    #[test]
    fn missing_plan_file() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            load_plan(&tmp.path().join("nope.json")),
            Err(StoreError::PlanNotFound(_))
        ));
    }

    #[test]
    fn corrupt_plan_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plan.json");
        fs::write(&path, "{\"plan_hash\": 3}").unwrap();
        assert!(matches!(load_plan(&path), Err(StoreError::Json(_))));
    }
}
