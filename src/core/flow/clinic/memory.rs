#![allow(clippy::result_large_err)] // Fixture IO returns AppError for consistent diagnostics.

use super::{
    ClinicDirectory, ClinicEntities, ClinicEvent, EventBroadcaster, Notification,
    NotificationSink, NoteTarget, StatusTarget,
};
use crate::core::error::AppError;
use crate::core::flow::store::file::atomic_write;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub status: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub status: String,
    #[serde(default)]
    pub internal_notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub kind: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub clinic_id: i64,
    pub user_id: i64,
    pub role_code: String,
    #[serde(default)]
    pub subrole: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub clinic_id: i64,
    pub event: ClinicEvent,
}

/// Serializable state behind [`InMemoryClinic`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicSnapshot {
    #[serde(default)]
    pub appointments: BTreeMap<i64, AppointmentRecord>,
    #[serde(default)]
    pub leads: BTreeMap<i64, LeadRecord>,
    #[serde(default)]
    pub conversations: BTreeMap<i64, ConversationRecord>,
    #[serde(default)]
    pub members: Vec<Membership>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub broadcasts: Vec<BroadcastRecord>,
}

/// In-process clinic backend used by tests and the CLI sandbox.
#[derive(Default)]
pub struct InMemoryClinic {
    state: RwLock<ClinicSnapshot>,
    fail_broadcasts: AtomicBool,
    unreachable_users: Mutex<BTreeSet<i64>>,
}

impl InMemoryClinic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ClinicSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            fail_broadcasts: AtomicBool::new(false),
            unreachable_users: Mutex::new(BTreeSet::new()),
        }
    }

    /// Load a JSON fixture; a missing file yields an empty clinic.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read clinic fixture {}: {}", path.display(), err),
            )
        })?;
        let snapshot: ClinicSnapshot = serde_json::from_slice(&bytes).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to parse clinic fixture {}: {}", path.display(), err),
            )
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn save(&self, path: &Path) -> Result<(), AppError> {
        let snapshot = self.snapshot().await;
        let content = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(path, &content)
    }

    pub async fn snapshot(&self) -> ClinicSnapshot {
        self.state.read().await.clone()
    }

    /// Make every broadcast fail, to exercise best-effort fan-out.
    pub fn fail_broadcasts(&self, fail: bool) {
        self.fail_broadcasts.store(fail, Ordering::SeqCst);
    }

    /// Make notifications addressed to `user_id` fail.
    pub async fn fail_notifications_for(&self, user_id: i64) {
        self.unreachable_users.lock().await.insert(user_id);
    }

    pub async fn insert_appointment(&self, id: i64, status: &str) {
        self.state.write().await.appointments.insert(
            id,
            AppointmentRecord {
                status: status.to_string(),
                notes: String::new(),
            },
        );
    }

    pub async fn insert_lead(&self, id: i64, status: &str) {
        self.state.write().await.leads.insert(
            id,
            LeadRecord {
                status: status.to_string(),
                internal_notes: String::new(),
            },
        );
    }

    pub async fn insert_conversation(&self, id: i64) {
        self.state
            .write()
            .await
            .conversations
            .insert(id, ConversationRecord::default());
    }

    pub async fn add_member(&self, clinic_id: i64, user_id: i64, role_code: &str, subrole: Option<&str>) {
        self.state.write().await.members.push(Membership {
            clinic_id,
            user_id,
            role_code: role_code.to_string(),
            subrole: subrole.map(str::to_string),
        });
    }
}

fn append_line(existing: &mut String, line: &str) {
    if !existing.is_empty() {
        existing.push('\n');
    }
    existing.push_str(line);
}

fn missing_entity(kind: &str, id: i64) -> AppError {
    AppError::infrastructure(format!("{} {} does not exist", kind, id)).with_code("FLOW-INFRA-404")
}

#[async_trait]
impl ClinicEntities for InMemoryClinic {
    async fn append_note(&self, target: NoteTarget, id: i64, line: &str) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        match target {
            NoteTarget::Appointment => {
                let record = state
                    .appointments
                    .get_mut(&id)
                    .ok_or_else(|| missing_entity(target.as_str(), id))?;
                append_line(&mut record.notes, line);
            }
            NoteTarget::LeadIntake => {
                let record = state
                    .leads
                    .get_mut(&id)
                    .ok_or_else(|| missing_entity(target.as_str(), id))?;
                append_line(&mut record.internal_notes, line);
            }
            NoteTarget::Conversation => {
                let record = state
                    .conversations
                    .get_mut(&id)
                    .ok_or_else(|| missing_entity(target.as_str(), id))?;
                record.messages.push(ConversationMessage {
                    kind: "note".to_string(),
                    body: line.to_string(),
                    created_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn current_status(
        &self,
        target: StatusTarget,
        id: i64,
    ) -> Result<Option<String>, AppError> {
        let state = self.state.read().await;
        Ok(match target {
            StatusTarget::Appointment => state.appointments.get(&id).map(|r| r.status.clone()),
            StatusTarget::LeadIntake => state.leads.get(&id).map(|r| r.status.clone()),
        })
    }

    async fn update_status(
        &self,
        target: StatusTarget,
        id: i64,
        status: &str,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let slot = match target {
            StatusTarget::Appointment => state.appointments.get_mut(&id).map(|r| &mut r.status),
            StatusTarget::LeadIntake => state.leads.get_mut(&id).map(|r| &mut r.status),
        };
        match slot {
            Some(current) => {
                *current = status.to_string();
                Ok(())
            }
            None => Err(missing_entity(target.as_str(), id)),
        }
    }
}

#[async_trait]
impl ClinicDirectory for InMemoryClinic {
    async fn is_clinic_member(&self, clinic_id: i64, user_id: i64) -> Result<bool, AppError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .any(|m| m.clinic_id == clinic_id && m.user_id == user_id))
    }

    async fn list_clinic_members(
        &self,
        clinic_id: i64,
        role_code: Option<&str>,
        subrole: Option<&str>,
        limit: usize,
    ) -> Result<Vec<i64>, AppError> {
        let state = self.state.read().await;
        let mut users = Vec::new();
        for member in state.members.iter().filter(|m| m.clinic_id == clinic_id) {
            if let Some(role) = role_code {
                if !member.role_code.eq_ignore_ascii_case(role) {
                    continue;
                }
            }
            if let Some(expected) = subrole {
                let matches = member
                    .subrole
                    .as_deref()
                    .map(|actual| actual.eq_ignore_ascii_case(expected))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            if !users.contains(&member.user_id) {
                users.push(member.user_id);
            }
            if users.len() >= limit {
                break;
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl NotificationSink for InMemoryClinic {
    async fn create_notification(&self, notification: Notification) -> Result<(), AppError> {
        if self.unreachable_users.lock().await.contains(&notification.user_id) {
            return Err(AppError::infrastructure(format!(
                "notification sink rejected user {}",
                notification.user_id
            ))
            .with_code("FLOW-INFRA-503"));
        }
        self.state.write().await.notifications.push(notification);
        Ok(())
    }
}

#[async_trait]
impl EventBroadcaster for InMemoryClinic {
    async fn broadcast(&self, clinic_id: i64, event: ClinicEvent) -> Result<(), AppError> {
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(AppError::infrastructure("broadcast channel unavailable"));
        }
        self.state
            .write()
            .await
            .broadcasts
            .push(BroadcastRecord { clinic_id, event });
        Ok(())
    }
}
