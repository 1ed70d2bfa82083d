//! Audit events and the sinks that receive them.
//!
//! Every state-changing vault operation emits at least one
//! [`AuditEvent`]. Sinks are best-effort: a failing sink is reported via
//! `tracing` and never rolls back the change that produced the event.

#[cfg(feature = "audit-log")]
pub mod sqlite;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::identity::{GroupId, UserId};
use crate::vault::{RequestId, RevisionId, SecretId};

#[cfg(feature = "audit-log")]
pub use sqlite::{AuditEntry, SqliteAuditLog};

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    /// Something a reviewer should look at, e.g. a superuser override.
    Warning,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }

    /// Inverse of [`AuditLevel::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The objects an event is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSubject {
    pub secret: Option<SecretId>,
    pub revision: Option<RevisionId>,
    pub request: Option<RequestId>,
    pub group: Option<GroupId>,
    pub user: Option<UserId>,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Human-readable description, e.g. `alice read 'db-prod' (4:9)`.
    pub message: String,
    pub actor: UserId,
    pub level: AuditLevel,
    pub subject: AuditSubject,
}

impl AuditEvent {
    pub fn new(level: AuditLevel, actor: &UserId, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            actor: actor.clone(),
            level,
            subject: AuditSubject::default(),
        }
    }

    pub fn info(actor: &UserId, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Info, actor, message)
    }

    pub fn warning(actor: &UserId, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Warning, actor, message)
    }

    pub fn secret(mut self, id: SecretId) -> Self {
        self.subject.secret = Some(id);
        self
    }

    pub fn revision(mut self, id: RevisionId) -> Self {
        self.subject.revision = Some(id);
        self
    }

    pub fn request(mut self, id: RequestId) -> Self {
        self.subject.request = Some(id);
        self
    }

    pub fn group(mut self, group: &GroupId) -> Self {
        self.subject.group = Some(group.clone());
        self
    }

    pub fn user(mut self, user: &UserId) -> Self {
        self.subject.user = Some(user.clone());
        self
    }
}

/// Receiver of audit events.
pub trait AuditSink: Send + Sync {
    fn log(&self, event: &AuditEvent) -> Result<()>;
}

/// Hand `event` to `sink`, reporting (but otherwise ignoring) failures.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.log(&event) {
        tracing::warn!(
            error = %e,
            actor = %event.actor,
            message = %event.message,
            "audit sink rejected event"
        );
    }
}

/// Keeps events in memory; handy for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything logged so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn log(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events to the `tracing` subscriber under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, event: &AuditEvent) -> Result<()> {
        match event.level {
            AuditLevel::Info => {
                tracing::info!(target: "audit", actor = %event.actor, "{}", event.message);
            }
            AuditLevel::Warning => {
                tracing::warn!(target: "audit", actor = %event.actor, "{}", event.message);
            }
        }
        Ok(())
    }
}

/// Delivers each event to several sinks. Every sink is attempted; the
/// first failure is returned after all of them ran.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl fmt::Debug for FanoutAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AuditSink for FanoutAuditSink {
    fn log(&self, event: &AuditEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KeywardError;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn log(&self, _event: &AuditEvent) -> Result<()> {
            Err(KeywardError::AuditError("disk full".into()))
        }
    }

    #[test]
    fn builder_fills_subject() {
        let alice = UserId::new("alice");
        let event = AuditEvent::warning(&alice, "override")
            .secret(SecretId(4))
            .revision(RevisionId(9))
            .user(&UserId::new("bob"));
        assert_eq!(event.level, AuditLevel::Warning);
        assert_eq!(event.subject.secret, Some(SecretId(4)));
        assert_eq!(event.subject.revision, Some(RevisionId(9)));
        assert_eq!(event.subject.user, Some(UserId::new("bob")));
        assert!(event.subject.request.is_none());
    }

    #[test]
    fn emit_swallows_sink_failures() {
        emit(&FailingSink, AuditEvent::info(&UserId::new("a"), "x"));
    }

    #[test]
    fn fanout_reaches_every_sink_even_after_a_failure() {
        let memory = Arc::new(MemoryAuditSink::new());
        let fanout = FanoutAuditSink::new()
            .with(Arc::new(FailingSink))
            .with(memory.clone());

        let result = fanout.log(&AuditEvent::info(&UserId::new("a"), "x"));
        assert!(result.is_err());
        assert_eq!(memory.len(), 1);
    }
}
