use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::DomainError;

pub type Metadata = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Qualified,
    Unqualified,
    Contacted,
    MeetingScheduled,
    Disqualified,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Qualified => "qualified",
            Self::Unqualified => "unqualified",
            Self::Contacted => "contacted",
            Self::MeetingScheduled => "meeting_scheduled",
            Self::Disqualified => "disqualified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "qualified" => Some(Self::Qualified),
            "unqualified" => Some(Self::Unqualified),
            "contacted" => Some(Self::Contacted),
            "meeting_scheduled" => Some(Self::MeetingScheduled),
            "disqualified" => Some(Self::Disqualified),
            _ => None,
        }
    }

    /// Position along the conversion pipeline. Statuses off the pipeline rank zero.
    fn rank(&self) -> u8 {
        match self {
            Self::New | Self::Unqualified | Self::Disqualified => 0,
            Self::Qualified => 1,
            Self::Contacted => 2,
            Self::MeetingScheduled => 3,
        }
    }

    pub fn flags(&self) -> LeadFlags {
        let rank = self.rank();
        LeadFlags { qualified: rank >= 1, contacted: rank >= 2, meeting_scheduled: rank >= 3 }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFlags {
    pub qualified: bool,
    pub contacted: bool,
    pub meeting_scheduled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub name: Option<String>,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub status: LeadStatus,
    pub qualified: bool,
    pub contacted: bool,
    pub meeting_scheduled: bool,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: Option<String>,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Partial update. `None` leaves a field untouched; a `Value::Null` metadata
/// entry removes that key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl LeadPatch {
    /// Patch that turns `before` into `after` for the mutable pipeline fields.
    pub fn between(before: &Lead, after: &Lead) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in &after.metadata {
            if before.metadata.get(key) != Some(value) {
                metadata.insert(key.clone(), value.clone());
            }
        }
        for key in before.metadata.keys() {
            if !after.metadata.contains_key(key) {
                metadata.insert(key.clone(), Value::Null);
            }
        }

        Self {
            status: (before.status != after.status).then_some(after.status),
            metadata,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.company.is_none()
            && self.phone.is_none()
            && self.message.is_none()
            && self.status.is_none()
            && self.metadata.is_empty()
    }
}

impl Lead {
    pub fn new(input: NewLead, now: DateTime<Utc>) -> Self {
        Self {
            id: LeadId::generate(),
            name: input.name,
            email: normalize_email(&input.email),
            company: input.company,
            phone: input.phone,
            message: input.message,
            status: LeadStatus::New,
            qualified: false,
            contacted: false,
            meeting_scheduled: false,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn flags(&self) -> LeadFlags {
        LeadFlags {
            qualified: self.qualified,
            contacted: self.contacted,
            meeting_scheduled: self.meeting_scheduled,
        }
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.meeting_scheduled && !self.contacted {
            return Err(DomainError::FlagInvariant(format!(
                "lead {} has meeting_scheduled without contacted",
                self.id
            )));
        }
        if self.contacted && !self.qualified {
            return Err(DomainError::FlagInvariant(format!(
                "lead {} has contacted without qualified",
                self.id
            )));
        }
        if self.flags() != self.status.flags() {
            return Err(DomainError::FlagInvariant(format!(
                "lead {} flags {:?} disagree with status `{}`",
                self.id,
                self.flags(),
                self.status
            )));
        }
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: LeadPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = Some(name);
        }
        if let Some(email) = patch.email {
            self.email = normalize_email(&email);
        }
        if let Some(company) = patch.company {
            self.company = Some(company);
        }
        if let Some(phone) = patch.phone {
            self.phone = Some(phone);
        }
        if let Some(message) = patch.message {
            self.message = Some(message);
        }
        if let Some(status) = patch.status {
            self.set_status(status);
        }
        for (key, value) in patch.metadata {
            if value.is_null() {
                self.metadata.remove(&key);
            } else {
                self.metadata.insert(key, value);
            }
        }
        self.updated_at = now;
    }

    /// Marking a lead that is already qualified (or further along) only refreshes the reason.
    pub fn mark_qualified(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.status.rank() == 0 {
            self.set_status(LeadStatus::Qualified);
            self.metadata.insert("qualified_at".to_string(), Value::String(now.to_rfc3339()));
        }
        self.metadata.insert("qualification_reason".to_string(), Value::String(reason.to_string()));
        self.metadata.remove("disqualification_reason");
        self.metadata.remove("disqualified_at");
        self.updated_at = now;
    }

    pub fn mark_unqualified(&mut self, reason: &str, now: DateTime<Utc>) {
        self.set_status(LeadStatus::Unqualified);
        self.metadata.insert("qualification_reason".to_string(), Value::String(reason.to_string()));
        self.metadata.remove("qualified_at");
        self.updated_at = now;
    }

    pub fn mark_disqualified(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.status != LeadStatus::Disqualified {
            self.metadata.insert("disqualified_at".to_string(), Value::String(now.to_rfc3339()));
        }
        self.set_status(LeadStatus::Disqualified);
        self.metadata
            .insert("disqualification_reason".to_string(), Value::String(reason.to_string()));
        self.metadata.remove("qualified_at");
        self.updated_at = now;
    }

    pub fn mark_contacted(&mut self, method: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.qualified {
            return Err(DomainError::InvalidLeadTransition {
                from: self.status,
                to: LeadStatus::Contacted,
            });
        }
        if self.status.rank() < LeadStatus::Contacted.rank() {
            self.set_status(LeadStatus::Contacted);
            self.metadata.insert("contacted_at".to_string(), Value::String(now.to_rfc3339()));
        }
        self.metadata.insert("contact_method".to_string(), Value::String(method.to_string()));
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_meeting_scheduled(
        &mut self,
        meeting_url: &str,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.contacted {
            return Err(DomainError::InvalidLeadTransition {
                from: self.status,
                to: LeadStatus::MeetingScheduled,
            });
        }
        if self.status != LeadStatus::MeetingScheduled {
            self.set_status(LeadStatus::MeetingScheduled);
            self.metadata
                .insert("meeting_scheduled_at".to_string(), Value::String(now.to_rfc3339()));
        }
        self.metadata.insert("meeting_url".to_string(), Value::String(meeting_url.to_string()));
        self.metadata.insert("event_type".to_string(), Value::String(event_type.to_string()));
        self.updated_at = now;
        Ok(())
    }

    fn set_status(&mut self, status: LeadStatus) {
        let flags = status.flags();
        self.status = status;
        self.qualified = flags.qualified;
        self.contacted = flags.contacted;
        self.meeting_scheduled = flags.meeting_scheduled;
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value;

    use super::{Lead, LeadPatch, LeadStatus, NewLead};
    use crate::errors::DomainError;

    fn lead() -> Lead {
        Lead::new(
            NewLead {
                name: Some("Ada Lovelace".to_string()),
                email: "  Ada@Example.COM ".to_string(),
                company: Some("Analytical Engines".to_string()),
                ..NewLead::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn new_lead_starts_unflagged_with_normalized_email() {
        let lead = lead();
        assert_eq!(lead.email, "ada@example.com");
        assert_eq!(lead.status, LeadStatus::New);
        assert!(!lead.qualified && !lead.contacted && !lead.meeting_scheduled);
        lead.check_invariants().expect("fresh lead is consistent");
    }

    #[test]
    fn pipeline_marks_keep_flags_consistent() {
        let mut lead = lead();
        let now = Utc::now();
        lead.mark_qualified("budget confirmed", now);
        lead.mark_contacted("email", now).expect("qualified -> contacted");
        lead.mark_meeting_scheduled("https://cal.example/x", "intro_call", now)
            .expect("contacted -> scheduled");

        assert_eq!(lead.status, LeadStatus::MeetingScheduled);
        assert!(lead.qualified && lead.contacted && lead.meeting_scheduled);
        assert_eq!(lead.metadata["meeting_url"], Value::from("https://cal.example/x"));
        lead.check_invariants().expect("scheduled lead is consistent");
    }

    #[test]
    fn contacting_an_unqualified_lead_is_rejected() {
        let mut lead = lead();
        let error = lead.mark_contacted("email", Utc::now()).expect_err("new -> contacted");
        assert!(matches!(error, DomainError::InvalidLeadTransition { .. }));
        assert!(!lead.contacted);
    }

    #[test]
    fn scheduling_before_contact_is_rejected() {
        let mut lead = lead();
        lead.mark_qualified("fit", Utc::now());
        let error = lead
            .mark_meeting_scheduled("https://cal.example/x", "demo", Utc::now())
            .expect_err("qualified -> scheduled");
        assert!(matches!(error, DomainError::InvalidLeadTransition { .. }));
    }

    #[test]
    fn mark_qualified_twice_is_idempotent() {
        let mut once = lead();
        let now = Utc::now();
        once.mark_qualified("team of 40, budget set", now);
        let mut twice = once.clone();
        twice.mark_qualified("team of 40, budget set", now);

        assert_eq!(once, twice);
    }

    #[test]
    fn mark_qualified_does_not_regress_an_advanced_lead() {
        let mut lead = lead();
        let now = Utc::now();
        lead.mark_qualified("fit", now);
        lead.mark_contacted("email", now).expect("contacted");
        lead.mark_qualified("still a fit", now);

        assert_eq!(lead.status, LeadStatus::Contacted);
        assert!(lead.contacted);
    }

    #[test]
    fn disqualification_clears_all_flags() {
        let mut lead = lead();
        let now = Utc::now();
        lead.mark_qualified("fit", now);
        lead.mark_contacted("email", now).expect("contacted");
        lead.mark_disqualified("no budget", now);

        assert_eq!(lead.status, LeadStatus::Disqualified);
        assert!(!lead.qualified && !lead.contacted && !lead.meeting_scheduled);
        assert_eq!(lead.metadata["disqualification_reason"], Value::from("no budget"));
        lead.check_invariants().expect("disqualified lead is consistent");
    }

    #[test]
    fn invariant_check_catches_hand_edited_flags() {
        let mut lead = lead();
        lead.contacted = true;
        assert!(matches!(lead.check_invariants(), Err(DomainError::FlagInvariant(_))));
    }

    #[test]
    fn patch_between_captures_status_and_metadata_changes() {
        let before = lead();
        let mut after = before.clone();
        after.metadata.insert("stale".to_string(), Value::from(1));
        let mut base = after.clone();
        after.mark_qualified("fit", Utc::now());
        after.metadata.remove("stale");

        let patch = LeadPatch::between(&base, &after);
        assert_eq!(patch.status, Some(LeadStatus::Qualified));
        assert_eq!(patch.metadata.get("stale"), Some(&Value::Null));

        base.apply_patch(patch, Utc::now());
        assert_eq!(base.status, LeadStatus::Qualified);
        assert!(base.qualified);
        assert!(!base.metadata.contains_key("stale"));
        assert_eq!(base.metadata["qualification_reason"], Value::from("fit"));
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in [
            LeadStatus::New,
            LeadStatus::Qualified,
            LeadStatus::Unqualified,
            LeadStatus::Contacted,
            LeadStatus::MeetingScheduled,
            LeadStatus::Disqualified,
        ] {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeadStatus::parse("archived"), None);
    }
}
