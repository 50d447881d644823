//! Task model: the unit of work carried through stores and workers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;

/// Caller-supplied key/value payload. Opaque to the engine.
///
/// `serde_json::Map` compares structurally, which is what value-equality
/// acknowledgement relies on.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a task as seen by observers.
///
/// State transitions:
/// - Queued -> Running -> Completed
/// - Scheduled -> Running -> Completed
/// - Queued | Scheduled -> Running -> Failed (retries exhausted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling metadata for `Queue::enqueue_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Run no earlier than `at`.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Run no earlier than `delay` from now.
    ///
    /// Measured from the wall clock (`Utc::now()`), not from a queue's
    /// injected `Clock`. Use `after_from(queue.now(), delay)` when the queue
    /// runs on a `FixedClock`.
    pub fn after(self, delay: Duration) -> Self {
        self.after_from(Utc::now(), delay)
    }

    /// Run no earlier than `delay` after `now`.
    pub fn after_from(self, now: DateTime<Utc>, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.at(at)
    }
}

/// Identity and execution record of one unit of work.
///
/// `status`, `retries` and `receipt_handle` are engine-local bookkeeping;
/// backends are free not to persist them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub payload: Payload,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retries: u32,
    #[serde(skip)]
    pub receipt_handle: Option<String>,
}

impl Task {
    /// A task eligible immediately.
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            payload,
            status: TaskStatus::Queued,
            priority: 0,
            scheduled_at: None,
            created_at,
            retries: 0,
            receipt_handle: None,
        }
    }

    /// A task carrying scheduling metadata.
    pub fn scheduled(
        id: TaskId,
        name: impl Into<String>,
        payload: Payload,
        options: TaskOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut task = Self::new(id, name, payload, created_at);
        task.status = TaskStatus::Scheduled;
        task.priority = options.priority;
        task.scheduled_at = options.scheduled_at;
        task
    }

    /// Unset `scheduled_at` means eligible immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Time left until the task becomes due, zero if already due.
    pub fn time_until_due(&self, now: DateTime<Utc>) -> Duration {
        self.scheduled_at
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Same handler name and structurally equal payload.
    pub fn same_content(&self, other: &Task) -> bool {
        self.name == other.name && self.payload == other.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap_or_default()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_task_is_queued_and_due() {
        let task = Task::new(TaskId::from(Ulid::new()), "echo", Payload::new(), t0());
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.is_due(t0()));
        assert_eq!(task.time_until_due(t0()), Duration::ZERO);
    }

    #[rstest]
    #[case::before(-1, false)]
    #[case::exactly(0, true)]
    #[case::after(1, true)]
    fn scheduled_task_due_at_boundary(#[case] offset_secs: i64, #[case] due: bool) {
        let at = t0() + chrono::Duration::seconds(60);
        let task = Task::scheduled(
            TaskId::from(Ulid::new()),
            "echo",
            Payload::new(),
            TaskOptions::new().priority(5).at(at),
            t0(),
        );
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.priority, 5);
        assert_eq!(task.is_due(at + chrono::Duration::seconds(offset_secs)), due);
    }

    #[test]
    fn time_until_due_counts_down() {
        let task = Task::scheduled(
            TaskId::from(Ulid::new()),
            "echo",
            Payload::new(),
            TaskOptions::new().at(t0() + chrono::Duration::seconds(60)),
            t0(),
        );
        assert_eq!(task.time_until_due(t0()), Duration::from_secs(60));
    }

    #[test]
    fn after_from_is_relative_to_the_given_instant() {
        let options = TaskOptions::new().after_from(t0(), Duration::from_secs(90));
        assert_eq!(options.scheduled_at, Some(t0() + chrono::Duration::seconds(90)));

        let saturated = TaskOptions::new().after_from(t0(), Duration::MAX);
        assert_eq!(saturated.scheduled_at, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn same_content_ignores_identity() {
        let a = Task::new(TaskId::from(Ulid::new()), "mail", payload(json!({"to": "a"})), t0());
        let b = Task::new(TaskId::from(Ulid::new()), "mail", payload(json!({"to": "a"})), t0());
        let c = Task::new(TaskId::from(Ulid::new()), "mail", payload(json!({"to": "b"})), t0());

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(s, "\"completed\"");
    }

    #[test]
    fn receipt_handle_is_not_serialized() {
        let mut task = Task::new(TaskId::from(Ulid::new()), "echo", Payload::new(), t0());
        task.receipt_handle = Some("rh-1".to_string());

        let v = serde_json::to_value(&task).unwrap();
        assert!(v.get("receipt_handle").is_none());
        assert_eq!(v["status"], "queued");
    }
}
