use crate::amocrm::{AmoCrmClient, ContactField, ContactInfo};
use crate::config::Config;
use crate::db::{NewStudent, StudentStore};
use crate::error::CrmError;
use crate::types::hook::LeadStatusEvent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NoLeadStatus,
    UnknownStatus,
    OtherStatus,
    NoContact,
}

/// Result of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutcome {
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IgnoreReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
}

impl HookOutcome {
    pub fn ignored(reason: IgnoreReason) -> Self {
        Self {
            handled: false,
            reason: Some(reason),
            contact: None,
            student_id: None,
        }
    }

    fn synced(contact: ContactInfo, student_id: Option<i64>) -> Self {
        Self {
            handled: true,
            reason: None,
            contact: Some(contact),
            student_id,
        }
    }
}

/// Turns leads that reach the exam status into student rows.
pub struct LeadSync {
    students: Arc<dyn StudentStore>,
    exam_status_name: String,
    store_timeout: Duration,
}

impl LeadSync {
    pub fn new(students: Arc<dyn StudentStore>, cfg: &Config) -> Self {
        Self {
            students,
            exam_status_name: normalize_status(&cfg.exam_status_name),
            store_timeout: cfg.store_timeout(),
        }
    }

    pub async fn handle(
        &self,
        client: &AmoCrmClient,
        event: &LeadStatusEvent,
    ) -> Result<HookOutcome, CrmError> {
        let status = client
            .get_pipeline_status_name(event.pipeline_id, event.status_id)
            .await?;
        debug!(lead_id = event.lead_id, status = ?status, "lead status resolved");
        let Some(status) = status else {
            return Ok(HookOutcome::ignored(IgnoreReason::UnknownStatus));
        };
        if normalize_status(&status) != self.exam_status_name {
            return Ok(HookOutcome::ignored(IgnoreReason::OtherStatus));
        }

        let Some(mut contact) = client.get_contact_info_by_lead_id(event.lead_id).await? else {
            warn!(lead_id = event.lead_id, "lead has no contact; nothing to sync");
            return Ok(HookOutcome::ignored(IgnoreReason::NoContact));
        };
        contact.lead_name = event.lead_name.clone();

        let Some(student) = project_student(&contact) else {
            warn!(lead_id = event.lead_id, "contact has no phone; student not stored");
            return Ok(HookOutcome::synced(contact, None));
        };
        let id = tokio::time::timeout(self.store_timeout, self.students.upsert_student(&student))
            .await
            .map_err(|_| CrmError::StoreTimeout(self.store_timeout))??;
        info!(lead_id = event.lead_id, student_id = id, "student upserted");
        Ok(HookOutcome::synced(contact, Some(id)))
    }
}

fn normalize_status(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Student row for a contact; `None` without a phone, which is the upsert key.
pub fn project_student(contact: &ContactInfo) -> Option<NewStudent> {
    let phone = first_value(contact, ContactField::Phone)?;
    let first_name = non_empty(&contact.first_name)
        .or_else(|| non_empty(&contact.name))
        .or_else(|| non_empty(&contact.lead_name))
        .unwrap_or_default();
    let last_name = non_empty(&contact.last_name).unwrap_or_default();

    Some(NewStudent {
        first_name,
        last_name,
        email: first_value(contact, ContactField::Email),
        phone,
        links: links_text(contact),
    })
}

fn links_text(contact: &ContactInfo) -> String {
    let field = |kind| {
        contact
            .field(kind)
            .map(ToString::to_string)
            .unwrap_or_default()
    };
    let lines = [
        ("company", contact.company.clone().unwrap_or_default()),
        ("skype", field(ContactField::Skype)),
        ("facebook", field(ContactField::Facebook)),
        ("facebookName", field(ContactField::FacebookName)),
        ("instagram", field(ContactField::Instagram)),
        ("vk", field(ContactField::Vk)),
        ("experience", field(ContactField::Experience)),
    ];
    lines
        .iter()
        .map(|(key, value)| format!("{key}: {value};"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_value(contact: &ContactInfo, kind: ContactField) -> Option<String> {
    contact
        .field(kind)
        .and_then(|v| v.first())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
