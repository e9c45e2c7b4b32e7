//! Leaderboard derived from the full ledger history.
//!
//! Ranking is recomputed from scratch on every new event; nothing here
//! keeps state between calls.

use crate::ledger::{LedgerError, LEDGER_HEADER};
use crate::types::{AttendanceEvent, Identity, Standing, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Header row of the leaderboard snapshot file.
pub const LEADERBOARD_HEADER: [&str; 3] = ["Rank", "Student", "Total Attendance"];

/// Read every event in the ledger, in file order.
pub fn load_all_events(path: &Path) -> Result<Vec<AttendanceEvent>, LedgerError> {
    let file = File::open(path).map_err(|source| LedgerError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut records = reader.records();

    let malformed = |line: u64, reason: String| LedgerError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let header = match records.next() {
        Some(record) => record.map_err(|e| read_failure(path, e))?,
        None => return Err(malformed(1, "missing header".into())),
    };
    if header.iter().ne(LEDGER_HEADER) {
        return Err(malformed(
            line_of(&header),
            format!("expected header {:?}, found {:?}", LEDGER_HEADER, header.iter().collect::<Vec<_>>()),
        ));
    }

    let mut events = Vec::new();
    for record in records {
        let record = record.map_err(|e| read_failure(path, e))?;
        let line = line_of(&record);

        if record.len() != LEDGER_HEADER.len() {
            return Err(malformed(
                line,
                format!("expected {} columns, found {}", LEDGER_HEADER.len(), record.len()),
            ));
        }

        let timestamp = NaiveDateTime::parse_from_str(&record[1], TIMESTAMP_FORMAT)
            .map_err(|e| malformed(line, format!("bad timestamp {:?}: {e}", &record[1])))?;

        events.push(AttendanceEvent::new(Identity::new(&record[0]), timestamp));
    }

    Ok(events)
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn read_failure(path: &Path, err: csv::Error) -> LedgerError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => LedgerError::Read {
            path: path.to_path_buf(),
            source,
        },
        _ => LedgerError::Malformed {
            path: path.to_path_buf(),
            line,
            reason,
        },
    }
}

/// Rank identities by number of events, highest first.
///
/// Ties keep the order in which identities first appear in `events`.
/// `Unknown` rows never rank.
pub fn rank(events: &[AttendanceEvent]) -> Vec<Standing> {
    let mut counts: Vec<(&Identity, usize)> = Vec::new();
    let mut slot: HashMap<&Identity, usize> = HashMap::new();

    for event in events.iter().filter(|e| !e.identity.is_unknown()) {
        match slot.get(&event.identity) {
            Some(&i) => counts[i].1 += 1,
            None => {
                slot.insert(&event.identity, counts.len());
                counts.push((&event.identity, 1));
            }
        }
    }

    // sort_by is stable
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    counts
        .into_iter()
        .enumerate()
        .map(|(i, (identity, total))| Standing {
            rank: i + 1,
            identity: identity.clone(),
            total,
        })
        .collect()
}

/// Rank-1 identity, or `None` when there is no leaderboard yet.
pub fn top(events: &[AttendanceEvent]) -> Option<Identity> {
    rank(events).into_iter().next().map(|s| s.identity)
}

/// Rewrite the leaderboard file with `standings`.
///
/// The rows go to a sibling temp file that is renamed over `path`, so a
/// reader never sees a partial table.
pub fn persist_snapshot(path: &Path, standings: &[Standing]) -> Result<(), LedgerError> {
    let tmp = temp_path(path);
    write_snapshot(&tmp, standings)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|source| {
            let _ = std::fs::remove_file(&tmp);
            LedgerError::Snapshot {
                path: path.to_path_buf(),
                source,
            }
        })
}

fn write_snapshot(path: &Path, standings: &[Standing]) -> std::io::Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(LEADERBOARD_HEADER)?;
    for standing in standings {
        writer.write_record([
            standing.rank.to_string().as_str(),
            standing.identity.as_str(),
            standing.total.to_string().as_str(),
        ])?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reload the ledger, rank it and rewrite the snapshot.
///
/// A failed snapshot write is logged, not returned: the next event
/// rewrites the whole file anyway.
pub fn refresh(ledger_path: &Path, leaderboard_path: &Path) -> Result<Vec<Standing>, LedgerError> {
    let standings = rank(&load_all_events(ledger_path)?);
    if let Err(err) = persist_snapshot(leaderboard_path, &standings) {
        tracing::warn!(error = %err, "leaderboard snapshot not written");
    }
    Ok(standings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, minute, 0)
            .unwrap()
    }

    fn events(names: &[&str]) -> Vec<AttendanceEvent> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| AttendanceEvent::new(Identity::new(*n), at(i as u32)))
            .collect()
    }

    fn pairs(standings: &[Standing]) -> Vec<(&str, usize)> {
        standings.iter().map(|s| (s.identity.as_str(), s.total)).collect()
    }

    #[test]
    fn test_rank_descending_by_count() {
        let ranked = rank(&events(&["bob", "alice", "alice", "carol", "alice", "bob"]));
        assert_eq!(pairs(&ranked), vec![("alice", 3), ("bob", 2), ("carol", 1)]);
        assert_eq!(ranked.iter().map(|s| s.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rank_ties_keep_first_appearance() {
        let ranked = rank(&events(&["carol", "alice", "bob", "alice", "carol", "bob"]));
        assert_eq!(pairs(&ranked), vec![("carol", 2), ("alice", 2), ("bob", 2)]);
    }

    #[test]
    fn test_rank_excludes_unknown() {
        let evs = events(&["Unknown", "alice", "Unknown", "Unknown", "bob", "alice"]);
        let ranked = rank(&evs);
        assert_eq!(pairs(&ranked), vec![("alice", 2), ("bob", 1)]);

        let known = evs.iter().filter(|e| !e.identity.is_unknown()).count();
        assert_eq!(ranked.iter().map(|s| s.total).sum::<usize>(), known);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let evs = events(&["dave", "erin", "dave", "frank", "erin", "gina"]);
        assert_eq!(rank(&evs), rank(&evs));
    }

    #[test]
    fn test_top_sentinel() {
        assert_eq!(top(&[]), None);
        assert_eq!(top(&events(&["Unknown"])), None);
        assert_eq!(top(&events(&["bob", "alice", "alice"])), Some(Identity::new("alice")));
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        let mut ledger = crate::ledger::Ledger::initialize(&path).unwrap();

        let written = events(&["alice", "bob", "doe, jane", "carol"]);
        for event in &written {
            assert!(ledger.record_if_new(&event.identity, event.timestamp).unwrap());
        }

        assert_eq!(load_all_events(&path).unwrap(), written);
    }

    #[test]
    fn test_load_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "Name,Timestamp\n").unwrap();
        assert!(load_all_events(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_all_events(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, LedgerError::Read { .. }));
    }

    #[test]
    fn test_load_rejects_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "alice,2024-03-01 09:00:00\n").unwrap();

        let err = load_all_events(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { line: 1, .. }), "{err}");
    }

    #[test]
    fn test_load_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "").unwrap();

        let err = load_all_events(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { .. }));
    }

    #[test]
    fn test_load_rejects_wrong_column_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(
            &path,
            "Name,Timestamp\nalice,2024-03-01 09:00:00\nbob,2024-03-01 09:01:00,extra\n",
        )
        .unwrap();

        let err = load_all_events(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_load_rejects_bad_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "Name,Timestamp\nalice,yesterday\n").unwrap();

        let err = load_all_events(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { line: 2, .. }), "{err}");
    }

    #[test]
    fn test_persist_snapshot_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_leaderboard.csv");

        persist_snapshot(&path, &rank(&events(&["alice", "bob", "bob"]))).unwrap();
        persist_snapshot(&path, &rank(&events(&["carol"]))).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows, vec!["Rank,Student,Total Attendance", "1,carol,1"]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_refresh_reads_ledger_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join("sheet.csv");
        let board = dir.path().join("board.csv");
        std::fs::write(
            &ledger,
            "Name,Timestamp\nbob,2024-03-01 09:00:00\nalice,2024-03-01 09:01:00\nalice,2024-03-02 09:00:00\n",
        )
        .unwrap();

        let standings = refresh(&ledger, &board).unwrap();
        assert_eq!(pairs(&standings), vec![("alice", 2), ("bob", 1)]);
        let text = std::fs::read_to_string(&board).unwrap();
        assert_eq!(text.lines().nth(1), Some("1,alice,2"));
    }
}
