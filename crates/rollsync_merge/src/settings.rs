//! Settings merge.

use rollsync_model::{Settings, SettingsEntry};
use serde::Serialize;
use std::cmp::Ordering;

/// What [`merge_settings`] did, per outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsMergeReport {
    /// Keys only present locally, or where the local entry won.
    pub kept_local: usize,
    /// Keys where the incoming entry replaced the local one.
    pub took_incoming: usize,
    /// Keys only present in the incoming settings.
    pub added: usize,
    /// Keys where both sides held mappings that were merged.
    pub merged_objects: usize,
}

/// Merges `incoming` settings over `local`.
///
/// For each key:
/// - both sides hold mappings: union of their fields, incoming wins on
///   collision, stamp is the later of the two
/// - otherwise the newer stamp wins, an unstamped entry is older than any
///   stamped one, and equal stamps keep the local value
///
/// Keys present on only one side are kept.
#[must_use]
pub fn merge_settings(local: &Settings, incoming: &Settings) -> (Settings, SettingsMergeReport) {
    let mut report = SettingsMergeReport::default();
    let mut merged = Settings::new();

    for (key, mine) in local {
        let entry = match incoming.get(key) {
            None => {
                report.kept_local += 1;
                mine.clone()
            }
            Some(theirs) if mine.both_objects(theirs) => {
                report.merged_objects += 1;
                merge_objects(mine, theirs)
            }
            Some(theirs) => {
                if stamp_order(theirs, mine) == Ordering::Greater {
                    report.took_incoming += 1;
                    theirs.clone()
                } else {
                    report.kept_local += 1;
                    mine.clone()
                }
            }
        };
        merged.insert(key.clone(), entry);
    }

    for (key, theirs) in incoming {
        if !local.contains_key(key) {
            report.added += 1;
            merged.insert(key.clone(), theirs.clone());
        }
    }

    (merged, report)
}

fn merge_objects(mine: &SettingsEntry, theirs: &SettingsEntry) -> SettingsEntry {
    let mut value = mine.value.clone();
    if let (Some(target), Some(source)) = (value.as_object_mut(), theirs.value.as_object()) {
        for (field, v) in source {
            target.insert(field.clone(), v.clone());
        }
    }
    SettingsEntry {
        value,
        updated_at: mine.updated_at.max(theirs.updated_at),
    }
}

// `None < Some(_)` on `Option` gives unstamped entries the oldest rank.
fn stamp_order(a: &SettingsEntry, b: &SettingsEntry) -> Ordering {
    a.updated_at.cmp(&b.updated_at)
}
