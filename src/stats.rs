use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::db::{self, AttendanceRecord, AttendanceStatus, StoreError, Subject};

// Students below this attendance percentage are flagged at risk.
pub const RISK_THRESHOLD_PERCENT: f64 = 75.0;

// `ratio` is the unrounded present/total share and `percentage` its rounded
// display form. The risk flag compares the unrounded ratio against the
// threshold so display rounding can never flip it. Both are None/false on an
// empty log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStat {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<i64>,
    pub risk: bool,
}

pub fn tally<I>(statuses: I) -> AttendanceStat
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut present: usize = 0;
    let mut absent: usize = 0;
    let mut late: usize = 0;

    for s in statuses {
        match s {
            AttendanceStatus::Present => present += 1,
            AttendanceStatus::Absent => absent += 1,
            AttendanceStatus::Late => late += 1,
        }
    }

    let total = present + absent + late;
    let ratio = if total > 0 {
        Some(present as f64 / total as f64)
    } else {
        None
    };
    let percentage = ratio.map(|r| (r * 100.0).round() as i64);
    let risk = matches!(ratio, Some(r) if r < RISK_THRESHOLD_PERCENT / 100.0);

    AttendanceStat {
        present,
        absent,
        late,
        total,
        ratio,
        percentage,
        risk,
    }
}

pub fn overall_stats(records: &[AttendanceRecord], student_id: &str) -> AttendanceStat {
    tally(
        records
            .iter()
            .filter(|r| r.student_id == student_id)
            .map(|r| r.status),
    )
}

pub fn subject_stats(
    records: &[AttendanceRecord],
    student_id: &str,
    subject_name: &str,
) -> AttendanceStat {
    tally(
        records
            .iter()
            .filter(|r| r.student_id == student_id && r.subject == subject_name)
            .map(|r| r.status),
    )
}

#[derive(Debug, Clone, Copy)]
pub enum PeriodScope<'a> {
    Student(&'a str),
    Subject(&'a str),
}

impl PeriodScope<'_> {
    fn matches(&self, r: &AttendanceRecord) -> bool {
        match self {
            PeriodScope::Student(id) => r.student_id == *id,
            PeriodScope::Subject(name) => r.subject == *name,
        }
    }
}

// Inclusive [from, to] window. ISO `YYYY-MM-DD` strings order
// lexicographically the same as chronologically, so this stays a plain
// string comparison.
pub fn period_stats(
    records: &[AttendanceRecord],
    scope: PeriodScope<'_>,
    from: &str,
    to: &str,
) -> AttendanceStat {
    tally(
        records
            .iter()
            .filter(|r| scope.matches(r) && r.date.as_str() >= from && r.date.as_str() <= to)
            .map(|r| r.status),
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTally {
    pub date: String,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
}

// Per-day counts inside the window, in date order.
pub fn daily_breakdown(
    records: &[AttendanceRecord],
    scope: PeriodScope<'_>,
    from: &str,
    to: &str,
) -> Vec<DailyTally> {
    let mut days: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
    for r in records {
        if !scope.matches(r) || r.date.as_str() < from || r.date.as_str() > to {
            continue;
        }
        let slot = days.entry(r.date.as_str()).or_insert((0, 0, 0));
        match r.status {
            AttendanceStatus::Present => slot.0 += 1,
            AttendanceStatus::Absent => slot.1 += 1,
            AttendanceStatus::Late => slot.2 += 1,
        }
    }
    days.into_iter()
        .map(|(date, (present, absent, late))| DailyTally {
            date: date.to_string(),
            present,
            absent,
            late,
        })
        .collect()
}

/// Consecutive present sessions needed to reach `target_percent`:
/// `ceil((t*total - present) / (1 - t))` with t = target_percent/100.
/// Zero when there is no history or the target is already met; callers keep
/// `target_percent` below 100.
pub fn required_streak_to_recover(stat: &AttendanceStat, target_percent: f64) -> u64 {
    let Some(ratio) = stat.ratio else {
        return 0;
    };
    let t = target_percent / 100.0;
    if ratio >= t {
        return 0;
    }
    let total = stat.total as f64;
    let present = stat.present as f64;
    // The tiny epsilon absorbs float noise when the quotient lands exactly on
    // an integer (t = 0.75 is exact in binary, other targets are not).
    let needed = ((t * total - present) / (1.0 - t) - 1e-9).ceil();
    needed.max(0.0) as u64
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub student_id: String,
    pub student_name: String,
    pub status: AttendanceStatus,
    pub marked: bool,
}

// One row per currently-enrolled student for the subject and date. Unmarked
// students prefill as `present` with `marked: false`. The roster reflects
// the enrollments table, never a department list.
pub fn session_roster(
    conn: &Connection,
    subject: &Subject,
    date: &str,
) -> Result<Vec<RosterEntry>, StoreError> {
    let students = db::students_enrolled_in_subject(conn, &subject.id)?;
    let marks: HashMap<String, AttendanceStatus> =
        db::list_attendance(conn, None, Some(&subject.name))?
            .into_iter()
            .filter(|r| r.date == date)
            .map(|r| (r.student_id, r.status))
            .collect();

    Ok(students
        .into_iter()
        .map(|u| {
            let existing = marks.get(&u.id).copied();
            RosterEntry {
                student_id: u.id,
                student_name: u.name,
                status: existing.unwrap_or(AttendanceStatus::Present),
                marked: existing.is_some(),
            }
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject_id: String,
    pub subject: String,
    pub stats: AttendanceStat,
    pub required_streak: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub overall: AttendanceStat,
    pub subjects: Vec<SubjectReport>,
}

// Overall stat plus one entry per enrolled subject. A freshly approved
// subject with no attendance yet shows up with total 0 rather than
// disappearing.
pub fn student_report(conn: &Connection, student_id: &str) -> Result<StudentReport, StoreError> {
    let records = db::list_attendance(conn, Some(student_id), None)?;
    let overall = overall_stats(&records, student_id);

    let mut subjects = Vec::new();
    for (subject_id, name) in db::enrolled_subjects_for_student(conn, student_id)? {
        let stats = subject_stats(&records, student_id, &name);
        subjects.push(SubjectReport {
            subject_id,
            subject: name,
            required_streak: required_streak_to_recover(&stats, RISK_THRESHOLD_PERCENT),
            stats,
        });
    }

    Ok(StudentReport {
        student_id: student_id.to_string(),
        overall,
        subjects,
    })
}
