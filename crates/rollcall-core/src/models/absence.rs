//! Absence-side types
//!
//! The absence entity itself belongs to the attendance subsystem. These are
//! the views and patches the orchestrator exchanges with it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::language::Language;

/// Attendance mark for a student on a school day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    #[default]
    Absent,
    Excused,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Late => "late",
        }
    }
}

/// Why a student was absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceReason {
    Sick,
    Travel,
    Work,
    FamilyEmergency,
    Migration,
    Weather,
    Transport,
    Other,
    Unknown,
}

impl AbsenceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceReason::Sick => "sick",
            AbsenceReason::Travel => "travel",
            AbsenceReason::Work => "work",
            AbsenceReason::FamilyEmergency => "family_emergency",
            AbsenceReason::Migration => "migration",
            AbsenceReason::Weather => "weather",
            AbsenceReason::Transport => "transport",
            AbsenceReason::Other => "other",
            AbsenceReason::Unknown => "unknown",
        }
    }

    /// Parse a reason label. Also accepts the classifier's gerund labels
    /// (`traveling`, `working`).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sick" | "illness" => Some(AbsenceReason::Sick),
            "travel" | "traveling" | "travelling" => Some(AbsenceReason::Travel),
            "work" | "working" => Some(AbsenceReason::Work),
            "family_emergency" | "family emergency" => Some(AbsenceReason::FamilyEmergency),
            "migration" => Some(AbsenceReason::Migration),
            "weather" => Some(AbsenceReason::Weather),
            "transport" => Some(AbsenceReason::Transport),
            "other" => Some(AbsenceReason::Other),
            "unknown" => Some(AbsenceReason::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for AbsenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Meaning of a keypad choice in the absence menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtmfMeaning {
    Sick,
    Travel,
    Work,
    FamilyEmergency,
    Other,
    SpeakToTeacher,
}

impl DtmfMeaning {
    /// 1=sick, 2=travel, 3=work, 4=family emergency, 5=other, 9=speak to teacher
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '1' => Some(DtmfMeaning::Sick),
            '2' => Some(DtmfMeaning::Travel),
            '3' => Some(DtmfMeaning::Work),
            '4' => Some(DtmfMeaning::FamilyEmergency),
            '5' => Some(DtmfMeaning::Other),
            '9' => Some(DtmfMeaning::SpeakToTeacher),
            _ => None,
        }
    }

    /// The absence reason this choice resolves, if it resolves one
    pub fn as_reason(&self) -> Option<AbsenceReason> {
        match self {
            DtmfMeaning::Sick => Some(AbsenceReason::Sick),
            DtmfMeaning::Travel => Some(AbsenceReason::Travel),
            DtmfMeaning::Work => Some(AbsenceReason::Work),
            DtmfMeaning::FamilyEmergency => Some(AbsenceReason::FamilyEmergency),
            DtmfMeaning::Other => Some(AbsenceReason::Other),
            DtmfMeaning::SpeakToTeacher => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DtmfMeaning::Sick => "sick",
            DtmfMeaning::Travel => "travel",
            DtmfMeaning::Work => "work",
            DtmfMeaning::FamilyEmergency => "family_emergency",
            DtmfMeaning::Other => "other",
            DtmfMeaning::SpeakToTeacher => "speak_to_teacher",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sick" => Some(DtmfMeaning::Sick),
            "travel" => Some(DtmfMeaning::Travel),
            "work" => Some(DtmfMeaning::Work),
            "family_emergency" => Some(DtmfMeaning::FamilyEmergency),
            "other" => Some(DtmfMeaning::Other),
            "speak_to_teacher" => Some(DtmfMeaning::SpeakToTeacher),
            _ => None,
        }
    }
}

/// A parent or guardian who can be called
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ParentContact {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(min = 9, max = 20))]
    pub phone: String,

    #[serde(default)]
    pub relation: Option<String>,

    #[serde(default)]
    pub verified: bool,

    #[serde(default)]
    pub opted_out: bool,

    #[serde(default)]
    pub preferred_language: Option<Language>,
}

impl ParentContact {
    pub fn is_callable(&self) -> bool {
        self.verified && !self.opted_out && !self.phone.trim().is_empty()
    }
}

/// First verified, non-opted-out contact that has a phone number
pub fn select_primary_contact(contacts: &[ParentContact]) -> Option<&ParentContact> {
    contacts.iter().find(|c| c.is_callable())
}

/// Who is being asked about, for prompts and the classifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub student_name: String,
    pub school_name: String,
}

/// An absence the attendance subsystem reports as needing a call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibleAbsence {
    pub absence_id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub context: CallContext,
    pub contacts: Vec<ParentContact>,
}

/// Follow-up counters for one school day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpStats {
    pub total_absences: i64,
    pub follow_up_required: i64,
    pub follow_up_completed: i64,
    pub call_triggered: i64,
    /// Required, not completed and not yet triggered
    pub pending: i64,
}
