//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用の Task Store / Document Store
//! - **SqliteStore**: リレーショナル DB（SQLite, sqlx）上の本番用ストア
//! - **SpoolIngestSource**: inbox ディレクトリの `*.txt` を読む取り込み元
//! - **StaticIngestSource**: テスト用の固定リスト

pub mod inmem_store;
pub mod spool_source;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryStore;
pub use self::spool_source::{SpoolIngestSource, StaticIngestSource};
pub use self::sqlite_store::SqliteStore;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::TaskId;

/// Dedup key of the retry that replaces a failed task. Requeueing the same
/// failed task twice yields the same retry.
pub(crate) fn retry_key(task_id: TaskId) -> String {
    format!("retry:{}", task_id.to_key())
}

/// Claims taken before this instant are stale. `None` when `stale_after`
/// reaches past the earliest representable time, so no claim can be that old.
pub(crate) fn reap_cutoff(now: DateTime<Utc>, stale_after: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_is_none_when_out_of_range() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            reap_cutoff(now, Duration::from_secs(60)),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 59, 0).unwrap())
        );
        assert_eq!(reap_cutoff(now, Duration::from_secs(9_000_000_000_000)), None);
        assert_eq!(reap_cutoff(now, Duration::from_secs(u64::MAX)), None);
    }
}
