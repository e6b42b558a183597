//! Order-preserving byte keys for the execution and report indexes.
//!
//! Every index key ends with the 16 id bytes of the row it points at, so a
//! key is unique and can be resolved back to its row. Timestamps are epoch
//! milliseconds with the sign bit flipped, big-endian, so byte order equals
//! time order. Strings carry a big-endian `u16` length prefix which keeps
//! composite prefixes unambiguous.

use crate::models::{ExecutionStatus, Report, ReportExecution, TimeRange};
use crate::state::{ExecutionFilter, ReportFilter};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

const ID_LEN: usize = 16;
const TIME_LEN: usize = 8;

/// Secondary access paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// `(startTime, status)`
    StartStatus,
    /// `(startedBy, startTime, status)`
    UserStartStatus,
    /// `(reportId, startTime, durationMs)`
    ReportStartDuration,
    /// `(reportId, startTime, recordsProcessed)`
    ReportStartRecords,
    /// `(type, category, provider)`
    ReportDims,
}

impl IndexKind {
    pub fn tree_name(&self) -> &'static str {
        match self {
            IndexKind::StartStatus => "idx_start_status",
            IndexKind::UserStartStatus => "idx_user_start_status",
            IndexKind::ReportStartDuration => "idx_report_start_duration",
            IndexKind::ReportStartRecords => "idx_report_start_records",
            IndexKind::ReportDims => "idx_report_dims",
        }
    }
}

/// All index keys of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionKeys {
    pub start_status: Vec<u8>,
    pub user_start_status: Vec<u8>,
    pub report_start_duration: Vec<u8>,
    pub report_start_records: Vec<u8>,
}

impl ExecutionKeys {
    pub fn for_execution(execution: &ReportExecution) -> Self {
        let start = encode_time(execution.start_time);
        let status = execution.status.code();
        let id = execution.id.as_bytes();

        let mut start_status = Vec::with_capacity(TIME_LEN + 1 + ID_LEN);
        start_status.extend_from_slice(&start);
        start_status.push(status);
        start_status.extend_from_slice(id);

        let mut user_start_status = encode_str(&execution.started_by);
        user_start_status.extend_from_slice(&start);
        user_start_status.push(status);
        user_start_status.extend_from_slice(id);

        let mut report_start_duration = execution.report_id.as_bytes().to_vec();
        report_start_duration.extend_from_slice(&start);
        match execution.duration_ms {
            Some(duration) => {
                report_start_duration.push(1);
                report_start_duration.extend_from_slice(&encode_i64(duration));
            }
            None => report_start_duration.push(0),
        }
        report_start_duration.extend_from_slice(id);

        let mut report_start_records = execution.report_id.as_bytes().to_vec();
        report_start_records.extend_from_slice(&start);
        report_start_records.extend_from_slice(&execution.records_processed.to_be_bytes());
        report_start_records.push(status);
        report_start_records.extend_from_slice(id);

        Self {
            start_status,
            user_start_status,
            report_start_duration,
            report_start_records,
        }
    }

    /// Key of this execution in one index
    pub fn key(&self, index: IndexKind) -> Option<&[u8]> {
        match index {
            IndexKind::StartStatus => Some(&self.start_status),
            IndexKind::UserStartStatus => Some(&self.user_start_status),
            IndexKind::ReportStartDuration => Some(&self.report_start_duration),
            IndexKind::ReportStartRecords => Some(&self.report_start_records),
            IndexKind::ReportDims => None,
        }
    }

    pub fn entries(&self) -> [(IndexKind, &[u8]); 4] {
        [
            (IndexKind::StartStatus, &self.start_status),
            (IndexKind::UserStartStatus, &self.user_start_status),
            (IndexKind::ReportStartDuration, &self.report_start_duration),
            (IndexKind::ReportStartRecords, &self.report_start_records),
        ]
    }
}

/// Index key of a report
pub fn report_dims_key(report: &Report) -> Vec<u8> {
    let mut key = encode_str(&report.report_type);
    key.extend_from_slice(&encode_str(&report.category));
    key.extend_from_slice(&encode_str(&report.provider));
    key.extend_from_slice(report.id.as_bytes());
    key
}

/// Range of an index to walk for a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub index: IndexKind,
    /// Inclusive lower bound
    pub lower: Vec<u8>,
    /// Exclusive upper bound
    pub upper: Vec<u8>,
}

impl ScanPlan {
    /// Pick the narrowest index for an execution filter
    pub fn for_executions(filter: &ExecutionFilter) -> Self {
        if let Some(report_id) = filter.report_id {
            Self::time_bounded(
                IndexKind::ReportStartDuration,
                report_id.as_bytes().to_vec(),
                &filter.time_range,
            )
        } else if let Some(ref user) = filter.started_by {
            Self::time_bounded(IndexKind::UserStartStatus, encode_str(user), &filter.time_range)
        } else {
            Self::time_bounded(IndexKind::StartStatus, Vec::new(), &filter.time_range)
        }
    }

    /// Per-report range of one of the two per-report indexes
    pub fn for_report(index: IndexKind, report_id: &Uuid, range: &TimeRange) -> Self {
        Self::time_bounded(index, report_id.as_bytes().to_vec(), range)
    }

    /// Longest dimension prefix the filter pins down
    pub fn for_reports(filter: &ReportFilter) -> Self {
        let mut prefix = Vec::new();
        if let Some(ref report_type) = filter.report_type {
            prefix.extend_from_slice(&encode_str(report_type));
            if let Some(ref category) = filter.category {
                prefix.extend_from_slice(&encode_str(category));
                if let Some(ref provider) = filter.provider {
                    prefix.extend_from_slice(&encode_str(provider));
                }
            }
        }

        let mut upper = prefix.clone();
        // 0xFF never occurs in UTF-8, so this sorts after every key under the prefix
        upper.extend_from_slice(&[0xFF; ID_LEN + 1]);

        Self {
            index: IndexKind::ReportDims,
            lower: prefix,
            upper,
        }
    }

    fn time_bounded(index: IndexKind, prefix: Vec<u8>, range: &TimeRange) -> Self {
        // keys hold whole milliseconds, so both bounds round up
        let start_ms = range.start.map_or(i64::MIN, ceil_millis);
        let end_ms = range.end.map_or(i64::MAX, ceil_millis);

        let mut lower = prefix.clone();
        lower.extend_from_slice(&encode_i64(start_ms));
        let mut upper = prefix;
        upper.extend_from_slice(&encode_i64(end_ms));
        if range.end.is_none() {
            // Keep i64::MAX itself inside the range
            upper.push(0xFF);
        }

        Self {
            index,
            lower,
            upper,
        }
    }
}

/// Fields recoverable from an index key without reading the row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: Uuid,
    pub start_ms: Option<i64>,
    pub status: Option<ExecutionStatus>,
    /// `Some(None)` for a running execution in the duration index
    pub duration_ms: Option<Option<i64>>,
    pub records_processed: Option<u64>,
}

impl IndexEntry {
    /// Decode a key of the given index; `None` for a malformed key
    pub fn decode(index: IndexKind, key: &[u8]) -> Option<Self> {
        let id = trailing_id(key)?;
        let mut entry = IndexEntry {
            id,
            start_ms: None,
            status: None,
            duration_ms: None,
            records_processed: None,
        };

        match index {
            IndexKind::StartStatus => {
                entry.start_ms = Some(decode_i64(key.get(..TIME_LEN)?)?);
                entry.status = ExecutionStatus::from_code(*key.get(TIME_LEN)?);
            }
            IndexKind::UserStartStatus => {
                let offset = 2 + str_len(key)?;
                entry.start_ms = Some(decode_i64(key.get(offset..offset + TIME_LEN)?)?);
                entry.status = ExecutionStatus::from_code(*key.get(offset + TIME_LEN)?);
            }
            IndexKind::ReportStartDuration => {
                entry.start_ms = Some(decode_i64(key.get(ID_LEN..ID_LEN + TIME_LEN)?)?);
                let tag_at = ID_LEN + TIME_LEN;
                entry.duration_ms = Some(match key.get(tag_at)? {
                    1 => Some(decode_i64(key.get(tag_at + 1..tag_at + 1 + TIME_LEN)?)?),
                    _ => None,
                });
            }
            IndexKind::ReportStartRecords => {
                let records_at = ID_LEN + TIME_LEN;
                entry.start_ms = Some(decode_i64(key.get(ID_LEN..records_at)?)?);
                let bytes: [u8; 8] = key.get(records_at..records_at + 8)?.try_into().ok()?;
                entry.records_processed = Some(u64::from_be_bytes(bytes));
                entry.status = ExecutionStatus::from_code(*key.get(records_at + 8)?);
            }
            IndexKind::ReportDims => {}
        }

        Some(entry)
    }
}

/// Epoch millis to an order-preserving key fragment
pub fn encode_time(at: DateTime<Utc>) -> [u8; 8] {
    encode_i64(at.timestamp_millis())
}

/// Smallest whole millisecond not before `at`
fn ceil_millis(at: DateTime<Utc>) -> i64 {
    let ms = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        ms
    } else {
        ms.saturating_add(1)
    }
}

pub fn decode_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(decode_i64(bytes)?).single()
}

fn encode_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_i64(bytes: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
}

fn encode_str(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    let mut out = Vec::with_capacity(2 + len);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
    out
}

fn str_len(key: &[u8]) -> Option<usize> {
    let bytes: [u8; 2] = key.get(..2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes) as usize)
}

/// Row id every index key ends with
pub fn trailing_id(key: &[u8]) -> Option<Uuid> {
    let start = key.len().checked_sub(ID_LEN)?;
    Uuid::from_slice(&key[start..]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_time_encoding_preserves_order() {
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        assert!(encode_time(before_epoch) < encode_time(at(0)));
        assert!(encode_time(at(0)) < encode_time(at(1)));
        assert_eq!(decode_time(&encode_time(at(5))), Some(at(5)));
    }

    #[test]
    fn test_execution_keys_decode() {
        let mut exec = ReportExecution::start(Uuid::new_v4(), "bob", at(0));
        exec.complete(ExecutionStatus::Error, at(2), 17, None).unwrap();
        let keys = ExecutionKeys::for_execution(&exec);

        let entry = IndexEntry::decode(IndexKind::UserStartStatus, &keys.user_start_status).unwrap();
        assert_eq!(entry.id, exec.id);
        assert_eq!(entry.status, Some(ExecutionStatus::Error));
        assert_eq!(entry.start_ms, Some(at(0).timestamp_millis()));

        let entry =
            IndexEntry::decode(IndexKind::ReportStartDuration, &keys.report_start_duration).unwrap();
        assert_eq!(entry.duration_ms, Some(Some(120_000)));

        let entry =
            IndexEntry::decode(IndexKind::ReportStartRecords, &keys.report_start_records).unwrap();
        assert_eq!(entry.records_processed, Some(17));
        assert_eq!(entry.status, Some(ExecutionStatus::Error));
    }

    #[test]
    fn test_running_execution_has_no_duration_in_key() {
        let exec = ReportExecution::start(Uuid::new_v4(), "bob", at(0));
        let keys = ExecutionKeys::for_execution(&exec);
        let entry =
            IndexEntry::decode(IndexKind::ReportStartDuration, &keys.report_start_duration).unwrap();
        assert_eq!(entry.duration_ms, Some(None));
    }

    #[test]
    fn test_scan_plan_bounds_contain_keys_in_range() {
        let report_id = Uuid::new_v4();
        let exec = ReportExecution::start(report_id, "carol", at(30));
        let keys = ExecutionKeys::for_execution(&exec);

        let filter = ExecutionFilter {
            report_id: Some(report_id),
            time_range: TimeRange::new(at(0), at(60)),
            ..Default::default()
        };
        let plan = ScanPlan::for_executions(&filter);
        assert_eq!(plan.index, IndexKind::ReportStartDuration);
        assert!(plan.lower <= keys.report_start_duration);
        assert!(keys.report_start_duration < plan.upper);

        let filter = ExecutionFilter {
            started_by: Some("carol".to_string()),
            time_range: TimeRange::new(at(31), at(60)),
            ..Default::default()
        };
        let plan = ScanPlan::for_executions(&filter);
        assert_eq!(plan.index, IndexKind::UserStartStatus);
        assert!(keys.user_start_status < plan.lower);
    }

    #[test]
    fn test_sub_millisecond_bounds_round_up() {
        let report_id = Uuid::new_v4();
        let started = at(30) + Duration::milliseconds(5);
        let exec = ReportExecution::start(report_id, "carol", started);
        let key = ExecutionKeys::for_execution(&exec).report_start_duration;
        let plan_for = |start: DateTime<Utc>, end: DateTime<Utc>| {
            ScanPlan::for_executions(&ExecutionFilter {
                report_id: Some(report_id),
                time_range: TimeRange::new(start, end),
                ..Default::default()
            })
        };

        // started before an end that falls inside the same millisecond
        let plan = plan_for(at(30), started + Duration::microseconds(200));
        assert!(plan.lower <= key && key < plan.upper);

        // a start bound past the execution within its millisecond excludes it
        let plan = plan_for(started + Duration::microseconds(200), at(31));
        assert!(key < plan.lower);

        // the end bound stays exclusive
        let plan = plan_for(at(30), started);
        assert!(key >= plan.upper);
    }

    #[test]
    fn test_report_prefix_bounds() {
        let report = Report::new("Endpoints", "inventory", "network", "aws");
        let key = report_dims_key(&report);

        let plan = ScanPlan::for_reports(&ReportFilter {
            report_type: Some("inventory".to_string()),
            ..Default::default()
        });
        assert!(plan.lower <= key && key < plan.upper);

        let plan = ScanPlan::for_reports(&ReportFilter {
            report_type: Some("cost".to_string()),
            ..Default::default()
        });
        assert!(!(plan.lower <= key && key < plan.upper));
    }
}
