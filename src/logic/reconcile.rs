//! Diffing of nested collections against a caller-supplied desired list.
//!
//! Both functions are pure: they compute what has to change and leave
//! applying the result (in one transaction) to the store.

use itertools::Itertools;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::logic::ValidationError;
use crate::model::{CaseStep, Id, NewCaseStep, ResourceKind};

/// One entry of a desired step list, as sent by the client.
///
/// `id` is set when the entry references a stored step; the other fields
/// are `None` when the client left them out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDescriptor {
    pub id: Option<Id>,
    pub number: Option<i32>,
    pub instruction: Option<String>,
    pub expected: Option<String>,
}

impl StepDescriptor {
    pub fn new(number: i32, instruction: &str, expected: &str) -> Self {
        Self {
            id: None,
            number: Some(number),
            instruction: Some(instruction.to_string()),
            expected: Some(expected.to_string()),
        }
    }

    pub fn reference(id: Id) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }
}

/// Writes needed to turn a parent's stored steps into the desired steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepPlan {
    pub create: Vec<NewCaseStep>,
    /// Stored steps with their new field values
    pub update: Vec<CaseStep>,
    pub delete: Vec<Id>,
}

impl StepPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

struct ResolvedStep<'a> {
    matched: Option<&'a CaseStep>,
    number: i32,
    instruction: String,
    expected: String,
}

/// Compute the step plan for one parent.
///
/// `existing` must hold only the steps of that parent. Descriptors carrying
/// an id are matched by identity; the rest are matched to an unclaimed
/// stored step with the same number, or created. Stored steps left
/// unmatched are deleted. Matched steps whose fields did not change
/// produce no write.
pub fn reconcile_steps(
    existing: &[CaseStep],
    desired: &[StepDescriptor],
) -> Result<StepPlan, ValidationError> {
    let by_id: HashMap<Id, &CaseStep> = existing.iter().map(|s| (s.id, s)).collect();
    let mut claimed: HashSet<Id> = HashSet::new();
    let mut resolved = Vec::with_capacity(desired.len());

    for (position, descriptor) in desired.iter().enumerate() {
        let step = match descriptor.id {
            Some(id) => {
                let uri = || ResourceKind::CaseStep.detail_uri(id);
                let stored = by_id
                    .get(&id)
                    .copied()
                    .ok_or_else(|| ValidationError::ForeignStep(uri()))?;
                if !claimed.insert(id) {
                    return Err(ValidationError::DuplicateStepReference(uri()));
                }
                ResolvedStep {
                    matched: Some(stored),
                    number: descriptor.number.unwrap_or(stored.number),
                    instruction: descriptor
                        .instruction
                        .clone()
                        .unwrap_or_else(|| stored.instruction.clone()),
                    expected: descriptor
                        .expected
                        .clone()
                        .unwrap_or_else(|| stored.expected.clone()),
                }
            }
            None => ResolvedStep {
                matched: None,
                number: descriptor
                    .number
                    .unwrap_or_else(|| i32::try_from(position + 1).unwrap_or(i32::MAX)),
                instruction: descriptor.instruction.clone().unwrap_or_default(),
                expected: descriptor.expected.clone().unwrap_or_default(),
            },
        };
        resolved.push(step);
    }

    if let Some(number) = resolved.iter().map(|s| s.number).find(|n| *n < 1) {
        return Err(ValidationError::InvalidStepNumber(number));
    }
    if let Some(number) = resolved.iter().map(|s| s.number).duplicates().next() {
        return Err(ValidationError::DuplicateStepNumber(number));
    }

    let by_number: HashMap<i32, &CaseStep> = existing.iter().map(|s| (s.number, s)).collect();
    for step in resolved.iter_mut().filter(|s| s.matched.is_none()) {
        if let Some(&stored) = by_number.get(&step.number) {
            if claimed.insert(stored.id) {
                step.matched = Some(stored);
            }
        }
    }

    let mut plan = StepPlan::default();
    for step in resolved {
        match step.matched {
            Some(stored) => {
                let unchanged = stored.number == step.number
                    && stored.instruction == step.instruction
                    && stored.expected == step.expected;
                if !unchanged {
                    plan.update.push(CaseStep {
                        id: stored.id,
                        caseversion_id: stored.caseversion_id,
                        number: step.number,
                        instruction: step.instruction,
                        expected: step.expected,
                    });
                }
            }
            None => plan.create.push(NewCaseStep {
                number: step.number,
                instruction: step.instruction,
                expected: step.expected,
            }),
        }
    }
    plan.delete = existing
        .iter()
        .filter(|s| !claimed.contains(&s.id))
        .map(|s| s.id)
        .collect();

    Ok(plan)
}

/// Link rows to add and remove for a many-to-many collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDiff {
    pub add: Vec<Id>,
    pub remove: Vec<Id>,
}

impl LinkDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply to an in-memory id set.
    pub fn apply(&self, links: &mut BTreeSet<Id>) {
        for id in &self.remove {
            links.remove(id);
        }
        links.extend(self.add.iter().copied());
    }
}

/// Set-membership diff between the current and desired link ids.
/// Duplicates in either list are ignored.
pub fn diff_links(current: &[Id], desired: &[Id]) -> LinkDiff {
    let current: BTreeSet<Id> = current.iter().copied().collect();
    let desired: BTreeSet<Id> = desired.iter().copied().collect();

    LinkDiff {
        add: desired.difference(&current).copied().collect(),
        remove: current.difference(&desired).copied().collect(),
    }
}
