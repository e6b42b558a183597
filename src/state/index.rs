use crate::error::Result;
use crate::models::ReportExecution;
use crate::state::keys::{ExecutionKeys, IndexEntry, IndexKind, ScanPlan};
use crate::state::{DurationSample, ExecutionFilter, ExecutionPage, PageRequest, ScanCursor};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use uuid::Uuid;

/// In-memory secondary indexes, one ordered key set per [`IndexKind`]
#[derive(Debug, Default)]
pub struct ExecutionIndex {
    trees: HashMap<IndexKind, BTreeSet<Vec<u8>>>,
}

impl ExecutionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_execution(&mut self, keys: &ExecutionKeys) {
        for (index, key) in keys.entries() {
            self.tree_mut(index).insert(key.to_vec());
        }
    }

    pub fn remove_execution(&mut self, keys: &ExecutionKeys) {
        for (index, key) in keys.entries() {
            self.tree_mut(index).remove(key);
        }
    }

    pub fn insert_report(&mut self, key: Vec<u8>) {
        self.tree_mut(IndexKind::ReportDims).insert(key);
    }

    pub fn remove_report(&mut self, key: &[u8]) {
        self.tree_mut(IndexKind::ReportDims).remove(key);
    }

    /// Keys of the plan's index in `[lower, upper)`, resuming after `after`
    pub fn scan<'a>(
        &'a self,
        plan: &'a ScanPlan,
        after: Option<&'a [u8]>,
    ) -> Box<dyn Iterator<Item = &'a Vec<u8>> + 'a> {
        let Some(tree) = self.trees.get(&plan.index) else {
            return Box::new(std::iter::empty());
        };

        let (lower, lower_key) = match after {
            Some(cursor) if cursor >= plan.lower.as_slice() => (Bound::Excluded(cursor), cursor),
            _ => (Bound::Included(plan.lower.as_slice()), plan.lower.as_slice()),
        };
        if lower_key >= plan.upper.as_slice() {
            return Box::new(std::iter::empty());
        }

        Box::new(tree.range::<[u8], _>((lower, Bound::Excluded(plan.upper.as_slice()))))
    }

    /// Number of entries in an index
    pub fn len(&self, index: IndexKind) -> usize {
        self.trees.get(&index).map_or(0, |tree| tree.len())
    }

    pub fn is_empty(&self) -> bool {
        self.trees.values().all(|tree| tree.is_empty())
    }

    fn tree_mut(&mut self, index: IndexKind) -> &mut BTreeSet<Vec<u8>> {
        self.trees.entry(index).or_default()
    }
}

/// Walk index keys in order, resolving each to its row, until the page fills.
///
/// An entry only counts when it is the key the current row derives for that
/// index, so entries left behind by an in-progress update are skipped.
pub(crate) fn collect_page<K, I, F>(
    plan: &ScanPlan,
    keys: I,
    filter: &ExecutionFilter,
    page: &PageRequest,
    mut fetch: F,
) -> Result<ExecutionPage>
where
    K: AsRef<[u8]>,
    I: Iterator<Item = Result<K>>,
    F: FnMut(&Uuid) -> Result<Option<ReportExecution>>,
{
    let mut executions = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;

    for key in keys {
        let key = key?;
        let key = key.as_ref();

        let Some(entry) = IndexEntry::decode(plan.index, key) else {
            tracing::warn!(index = plan.index.tree_name(), "Skipping malformed index key");
            continue;
        };
        if let Some(status) = entry.status {
            if !filter.matches_status(status) {
                continue;
            }
        }

        let Some(execution) = fetch(&entry.id)? else {
            continue;
        };
        let current = ExecutionKeys::for_execution(&execution);
        if current.key(plan.index) != Some(key) || !filter.matches(&execution) {
            continue;
        }

        executions.push(execution);
        if executions.len() >= page.limit {
            last_key = Some(key.to_vec());
            break;
        }
    }

    Ok(ExecutionPage {
        executions,
        next: last_key.map(ScanCursor),
    })
}

/// Terminal durations from duration index keys
pub(crate) fn duration_samples<K, I>(keys: I) -> Result<Vec<DurationSample>>
where
    K: AsRef<[u8]>,
    I: Iterator<Item = Result<K>>,
{
    let mut samples = Vec::new();
    for key in keys {
        let key = key?;
        if let Some(entry) = IndexEntry::decode(IndexKind::ReportStartDuration, key.as_ref()) {
            if let Some(Some(duration_ms)) = entry.duration_ms {
                samples.push(DurationSample {
                    execution_id: entry.id,
                    duration_ms,
                });
            }
        }
    }
    Ok(samples)
}

/// Records processed by terminal executions, from records index keys
pub(crate) fn records_sum<K, I>(keys: I) -> Result<u64>
where
    K: AsRef<[u8]>,
    I: Iterator<Item = Result<K>>,
{
    let mut total = 0u64;
    for key in keys {
        let key = key?;
        if let Some(entry) = IndexEntry::decode(IndexKind::ReportStartRecords, key.as_ref()) {
            if entry.status.is_some_and(|s| s.is_terminal()) {
                total = total.saturating_add(entry.records_processed.unwrap_or(0));
            }
        }
    }
    Ok(total)
}
