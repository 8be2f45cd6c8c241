use crate::domain::models::StudySession;
use chrono::NaiveDate;

/// Same-day statistics over the ephemeral session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub total_minutes: i64,
    pub session_count: usize,
    pub average_minutes: i64,
}

/// Ephemeral, process-local list of completed study intervals. Entries are
/// created only when a session ends and are gone on restart; nothing here is
/// ever written to the remote store.
#[derive(Debug)]
pub struct SessionLog {
    entries: Vec<StudySession>,
    capacity: usize,
}

impl SessionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, session: StudySession) {
        self.entries.push(session);
        if self.entries.len() > self.capacity {
            let overflow = self.entries.len() - self.capacity;
            self.entries.drain(..overflow);
        }
    }

    pub fn entries(&self) -> &[StudySession] {
        &self.entries
    }

    pub fn sessions_on(&self, date: NaiveDate) -> Vec<StudySession> {
        self.entries
            .iter()
            .filter(|session| session.started_at.date_naive() == date)
            .cloned()
            .collect()
    }

    pub fn day_summary(&self, date: NaiveDate) -> DaySummary {
        let sessions = self.sessions_on(date);
        let total_minutes: i64 = sessions.iter().map(|session| session.duration_minutes).sum();
        let session_count = sessions.len();
        let average_minutes = if session_count > 0 {
            // Half-up average, matching the displayed stat.
            (total_minutes as f64 / session_count as f64).round() as i64
        } else {
            0
        };
        DaySummary {
            total_minutes,
            session_count,
            average_minutes,
        }
    }

    /// Most recent sessions first.
    pub fn recent(&self, limit: usize) -> Vec<StudySession> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}
