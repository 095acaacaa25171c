//! Plan snapshot: full replacement and index-based status patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of a single plan step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    #[serde(alias = "completed")]
    #[strum(to_string = "done", serialize = "completed")]
    Done,
    Blocked,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanItem {
    pub step: String,
    pub status: PlanStatus,
}

impl PlanItem {
    pub fn new(step: impl Into<String>, status: PlanStatus) -> Self {
        Self {
            step: step.into(),
            status,
        }
    }
}

/// Loosely-typed plan item as produced by a model; invalid ones are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanItemInput {
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub status: Option<PlanStatus>,
}

impl PlanItemInput {
    /// Decode one raw item; `None` when its step or status does not parse.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// Status change for the item at a 1-based `index`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanPatch {
    pub index: i64,
    pub status: PlanStatus,
}

impl PlanPatch {
    /// Decode raw patches one at a time. Returns the valid patches and how
    /// many entries had a non-integer index or an unknown status.
    pub fn decode_all(values: Vec<serde_json::Value>) -> (Vec<Self>, usize) {
        let total = values.len();
        let patches: Vec<Self> = values
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        let malformed = total - patches.len();
        (patches, malformed)
    }
}

/// Ordered plan for one agent within a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSnapshot {
    pub items: Vec<PlanItem>,
    pub updated_at: DateTime<Utc>,
}

/// Result of applying a patch batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanPatchOutcome {
    /// No full snapshot exists yet; nothing was changed.
    NoSnapshot,
    Applied { applied: usize, skipped: usize },
}

impl PlanPatchOutcome {
    /// Count `malformed` undecodable patches as skipped.
    pub fn with_malformed(self, malformed: usize) -> Self {
        match self {
            Self::Applied { applied, skipped } => Self::Applied {
                applied,
                skipped: skipped + malformed,
            },
            Self::NoSnapshot => Self::NoSnapshot,
        }
    }
}

impl PlanSnapshot {
    /// Build a snapshot from raw items, dropping those without a usable step.
    pub fn from_inputs(inputs: Vec<PlanItemInput>) -> Self {
        let items = inputs
            .into_iter()
            .filter_map(|input| {
                let step = input.step?.trim().to_string();
                if step.is_empty() {
                    return None;
                }
                Some(PlanItem {
                    step,
                    status: input.status.unwrap_or(PlanStatus::Pending),
                })
            })
            .collect();
        Self {
            items,
            updated_at: Utc::now(),
        }
    }

    /// Apply status patches in order. Out-of-range or non-positive indexes are
    /// skipped; the step text is never touched.
    pub fn apply_patches(&mut self, patches: &[PlanPatch]) -> (usize, usize) {
        let mut applied = 0;
        let mut skipped = 0;
        for patch in patches {
            let slot = usize::try_from(patch.index)
                .ok()
                .and_then(|index| index.checked_sub(1))
                .and_then(|zero_based| self.items.get_mut(zero_based));
            match slot {
                Some(item) => {
                    item.status = patch.status;
                    applied += 1;
                }
                None => skipped += 1,
            }
        }
        if applied > 0 {
            self.updated_at = Utc::now();
        }
        (applied, skipped)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn input(step: Option<&str>, status: Option<PlanStatus>) -> PlanItemInput {
        PlanItemInput {
            step: step.map(str::to_string),
            status,
        }
    }

    #[test]
    fn from_inputs_drops_blank_and_missing_steps() {
        let snapshot = PlanSnapshot::from_inputs(vec![
            input(Some("  read docs "), None),
            input(Some("   "), Some(PlanStatus::Done)),
            input(None, Some(PlanStatus::Pending)),
            input(Some("write code"), Some(PlanStatus::InProgress)),
        ]);

        assert_eq!(
            snapshot.items,
            vec![
                PlanItem::new("read docs", PlanStatus::Pending),
                PlanItem::new("write code", PlanStatus::InProgress),
            ]
        );
    }

    #[test]
    fn patches_skip_bad_indexes_and_keep_step_text() {
        let mut snapshot = PlanSnapshot::from_inputs(vec![
            input(Some("a"), None),
            input(Some("b"), None),
        ]);

        let (applied, skipped) = snapshot.apply_patches(&[
            PlanPatch { index: 0, status: PlanStatus::Done },
            PlanPatch { index: -3, status: PlanStatus::Done },
            PlanPatch { index: 3, status: PlanStatus::Done },
            PlanPatch { index: 2, status: PlanStatus::Blocked },
        ]);

        assert_eq!((applied, skipped), (1, 3));
        assert_eq!(snapshot.items[0], PlanItem::new("a", PlanStatus::Pending));
        assert_eq!(snapshot.items[1], PlanItem::new("b", PlanStatus::Blocked));
    }

    #[test]
    fn completed_is_accepted_as_done() {
        let patch: PlanPatch = serde_json::from_str(r#"{"index":1,"status":"completed"}"#).unwrap();
        assert_eq!(patch.status, PlanStatus::Done);
        assert_eq!("completed".parse::<PlanStatus>().unwrap(), PlanStatus::Done);
        assert_eq!(PlanStatus::Done.to_string(), "done");
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        use serde_json::json;

        let items: Vec<PlanItemInput> = vec![
            json!({ "step": "a", "status": "bogus" }),
            json!({ "step": 7 }),
            json!({ "step": "b" }),
        ]
        .into_iter()
        .filter_map(PlanItemInput::from_value)
        .collect();
        assert_eq!(
            PlanSnapshot::from_inputs(items).items,
            vec![PlanItem::new("b", PlanStatus::Pending)]
        );

        let (patches, malformed) = PlanPatch::decode_all(vec![
            json!({ "index": "1", "status": "done" }),
            json!({ "index": 2, "status": "finished" }),
            json!({ "index": 2, "status": "done" }),
        ]);
        assert_eq!(patches, vec![PlanPatch { index: 2, status: PlanStatus::Done }]);
        assert_eq!(malformed, 2);
        assert_eq!(
            PlanPatchOutcome::Applied { applied: 1, skipped: 0 }.with_malformed(malformed),
            PlanPatchOutcome::Applied { applied: 1, skipped: 2 }
        );
        assert_eq!(PlanPatchOutcome::NoSnapshot.with_malformed(3), PlanPatchOutcome::NoSnapshot);
    }
}
