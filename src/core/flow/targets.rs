//! Runtime target resolution: which clinic entities a side-effecting node acts on.
//!
//! Trigger producers have shipped payloads under several shapes over time, so each
//! target kind scans an ordered list of candidate paths. The first path yielding an
//! integer wins. The table below is a versioned contract; new aliases get a version
//! bump rather than being guessed at runtime.

use crate::core::flow::context::{lookup_path, value_as_integer};
use crate::core::flow::state::Execution;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const TARGET_ALIAS_TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Clinic,
    Appointment,
    LeadIntake,
    Conversation,
    Patient,
}

impl TargetKind {
    pub const ALL: [TargetKind; 5] = [
        TargetKind::Clinic,
        TargetKind::Appointment,
        TargetKind::LeadIntake,
        TargetKind::Conversation,
        TargetKind::Patient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Clinic => "clinic",
            TargetKind::Appointment => "appointment",
            TargetKind::LeadIntake => "lead_intake",
            TargetKind::Conversation => "conversation",
            TargetKind::Patient => "patient",
        }
    }

    /// Candidate context paths, in priority order.
    pub fn candidate_paths(&self) -> &'static [&'static str] {
        match self {
            TargetKind::Clinic => &[
                "clinic_id",
                "clinic.id",
                "trigger.clinic_id",
                "trigger.data.clinic_id",
                "clinica.id_clinica",
                "id_clinica",
                "appointment.clinic_id",
                "lead.clinic_id",
                "conversation.clinic_id",
            ],
            TargetKind::Appointment => &[
                "appointment.id",
                "appointment_id",
                "trigger.data.appointment_id",
                "trigger.data.appointment.id",
                "cita.id_cita",
                "id_cita",
            ],
            TargetKind::LeadIntake => &[
                "lead.id",
                "lead_intake.id",
                "lead_intake_id",
                "lead_id",
                "trigger.data.lead_intake_id",
                "trigger.data.lead_id",
                "trigger.data.lead.id",
            ],
            TargetKind::Conversation => &[
                "conversation.id",
                "conversation_id",
                "trigger.data.conversation_id",
                "trigger.data.conversation.id",
                "message.conversation_id",
                "thread.id",
            ],
            TargetKind::Patient => &[
                "patient.id",
                "patient_id",
                "trigger.data.patient_id",
                "trigger.data.patient.id",
                "paciente.id_paciente",
                "appointment.patient_id",
                "cita.id_paciente",
                "lead.patient_id",
            ],
        }
    }

    /// Map a trigger's declared entity type onto a target kind.
    pub fn from_entity_type(entity_type: &str) -> Option<Self> {
        let normalized = entity_type.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "clinic" | "clinics" | "clinica" => Some(TargetKind::Clinic),
            "appointment" | "appointments" | "cita" | "citas" => Some(TargetKind::Appointment),
            "lead" | "leads" | "lead_intake" | "lead_intakes" | "leadintake" => {
                Some(TargetKind::LeadIntake)
            }
            "conversation" | "conversations" | "chat_conversation" | "thread" => {
                Some(TargetKind::Conversation)
            }
            "patient" | "patients" | "paciente" | "pacientes" => Some(TargetKind::Patient),
            _ => None,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete entity ids a node may act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeTargets {
    pub clinic_id: Option<i64>,
    pub appointment_id: Option<i64>,
    pub lead_intake_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub patient_id: Option<i64>,
}

impl RuntimeTargets {
    pub fn get(&self, kind: TargetKind) -> Option<i64> {
        match kind {
            TargetKind::Clinic => self.clinic_id,
            TargetKind::Appointment => self.appointment_id,
            TargetKind::LeadIntake => self.lead_intake_id,
            TargetKind::Conversation => self.conversation_id,
            TargetKind::Patient => self.patient_id,
        }
    }

    fn set(&mut self, kind: TargetKind, id: Option<i64>) {
        match kind {
            TargetKind::Clinic => self.clinic_id = id,
            TargetKind::Appointment => self.appointment_id = id,
            TargetKind::LeadIntake => self.lead_intake_id = id,
            TargetKind::Conversation => self.conversation_id = id,
            TargetKind::Patient => self.patient_id = id,
        }
    }
}

fn first_integer(context: &Value, paths: &[&str]) -> Option<i64> {
    paths
        .iter()
        .filter_map(|path| lookup_path(context, path))
        .find_map(value_as_integer)
}

/// Resolve every target kind from the context, then the trigger's own entity.
pub fn resolve_targets(execution: &Execution, context: &Value) -> RuntimeTargets {
    let declared_kind = execution
        .trigger_entity_type
        .as_deref()
        .and_then(TargetKind::from_entity_type);
    let mut targets = RuntimeTargets::default();
    for kind in TargetKind::ALL {
        let resolved = first_integer(context, kind.candidate_paths()).or_else(|| {
            if declared_kind == Some(kind) {
                execution.trigger_entity_id
            } else {
                None
            }
        });
        targets.set(kind, resolved);
    }
    if targets.clinic_id.is_none() {
        targets.clinic_id = execution.clinic_id;
    }
    targets
}
