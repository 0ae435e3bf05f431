//! Clinic-side collaborators used by action handlers.

use crate::core::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub mod memory;

pub use memory::InMemoryClinic;

/// Entities that accept appended notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteTarget {
    Conversation,
    LeadIntake,
    Appointment,
}

/// Entities with a workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTarget {
    Appointment,
    LeadIntake,
}

pub const APPOINTMENT_STATUSES: [&str; 5] = [
    "pendiente",
    "confirmada",
    "cancelada",
    "completada",
    "no_asistio",
];

pub const LEAD_STATUSES: [&str; 8] = [
    "nuevo",
    "contactado",
    "esperando_info",
    "info_recibida",
    "citado",
    "acudio_cita",
    "convertido",
    "descartado",
];

impl NoteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteTarget::Conversation => "conversation",
            NoteTarget::LeadIntake => "lead_intake",
            NoteTarget::Appointment => "appointment",
        }
    }
}

impl StatusTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTarget::Appointment => "appointment",
            StatusTarget::LeadIntake => "lead_intake",
        }
    }

    pub fn allowed_statuses(&self) -> &'static [&'static str] {
        match self {
            StatusTarget::Appointment => &APPOINTMENT_STATUSES,
            StatusTarget::LeadIntake => &LEAD_STATUSES,
        }
    }

    pub fn accepts(&self, status: &str) -> bool {
        self.allowed_statuses().contains(&status)
    }
}

impl fmt::Display for NoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StatusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-app notification addressed to one clinic user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub clinic_id: i64,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Real-time event fanned out to clinic-scoped subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicEvent {
    pub event: String,
    pub payload: Value,
}

/// Note and status mutations against clinic entities, keyed by integer id.
#[async_trait]
pub trait ClinicEntities: Send + Sync + 'static {
    async fn append_note(&self, target: NoteTarget, id: i64, line: &str) -> Result<(), AppError>;

    /// Current status, or `None` when the entity does not exist.
    async fn current_status(&self, target: StatusTarget, id: i64)
        -> Result<Option<String>, AppError>;

    async fn update_status(&self, target: StatusTarget, id: i64, status: &str)
        -> Result<(), AppError>;
}

/// Clinic membership queries.
#[async_trait]
pub trait ClinicDirectory: Send + Sync + 'static {
    async fn is_clinic_member(&self, clinic_id: i64, user_id: i64) -> Result<bool, AppError>;

    /// Member user ids filtered by role and optional sub-role, at most `limit`.
    async fn list_clinic_members(
        &self,
        clinic_id: i64,
        role_code: Option<&str>,
        subrole: Option<&str>,
        limit: usize,
    ) -> Result<Vec<i64>, AppError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn create_notification(&self, notification: Notification) -> Result<(), AppError>;
}

/// Best-effort real-time fan-out. Failures never fail the calling action.
#[async_trait]
pub trait EventBroadcaster: Send + Sync + 'static {
    async fn broadcast(&self, clinic_id: i64, event: ClinicEvent) -> Result<(), AppError>;
}

/// Collaborators handed to the built-in action handlers.
#[derive(Clone)]
pub struct ClinicServices {
    pub entities: Arc<dyn ClinicEntities>,
    pub directory: Arc<dyn ClinicDirectory>,
    pub notifications: Arc<dyn NotificationSink>,
    pub broadcaster: Option<Arc<dyn EventBroadcaster>>,
}

impl ClinicServices {
    /// Wire every collaborator to one implementation.
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: ClinicEntities + ClinicDirectory + NotificationSink + EventBroadcaster,
    {
        Self {
            entities: backend.clone(),
            directory: backend.clone(),
            notifications: backend.clone(),
            broadcaster: Some(backend),
        }
    }

    /// Broadcast without propagating failures.
    pub async fn broadcast_best_effort(&self, clinic_id: i64, event: ClinicEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            let name = event.event.clone();
            if let Err(err) = broadcaster.broadcast(clinic_id, event).await {
                tracing::warn!(clinic_id, event = %name, error = %err, "clinic broadcast failed");
            }
        }
    }
}
