use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use super::normalize::{
    normalize_bool, normalize_enum, normalize_nullable_finite_number, normalize_string,
    normalize_string_list, EnumKey,
};

pub const DEFAULT_DISTRACTING_SITES: [&str; 10] = [
    "youtube.com",
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "reddit.com",
    "tiktok.com",
    "netflix.com",
    "spotify.com",
    "soundcloud.com",
    "vnexpress.net",
];

pub const DEFAULT_DEEPWORK_BLOCKED_SITES: [&str; 3] =
    ["discord.com", "messenger.com", "whatsapp.com"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InteractionLevel {
    Balanced,
    Minimal,
    Max,
}

impl Default for InteractionLevel {
    fn default() -> Self {
        InteractionLevel::Balanced
    }
}

impl InteractionLevel {
    pub const ALL: [InteractionLevel; 3] = [
        InteractionLevel::Balanced,
        InteractionLevel::Minimal,
        InteractionLevel::Max,
    ];
}

impl EnumKey for InteractionLevel {
    fn key(&self) -> &'static str {
        match self {
            InteractionLevel::Balanced => "balanced",
            InteractionLevel::Minimal => "minimal",
            InteractionLevel::Max => "max",
        }
    }
}

/// Every field of [`FocusState`], keyed by its persisted (camelCase) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    IsEnabled,
    InteractionLevel,
    CurrentTask,
    IsInFlow,
    BlockDistractions,
    BreakReminderEnabled,
    DistractingSites,
    DeepWorkBlockedSites,
    ReminderStartTime,
    ReminderInterval,
    ReminderExpectedEndTime,
}

impl StateField {
    pub const ALL: [StateField; 11] = [
        StateField::IsEnabled,
        StateField::InteractionLevel,
        StateField::CurrentTask,
        StateField::IsInFlow,
        StateField::BlockDistractions,
        StateField::BreakReminderEnabled,
        StateField::DistractingSites,
        StateField::DeepWorkBlockedSites,
        StateField::ReminderStartTime,
        StateField::ReminderInterval,
        StateField::ReminderExpectedEndTime,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StateField::IsEnabled => "isEnabled",
            StateField::InteractionLevel => "interactionLevel",
            StateField::CurrentTask => "currentTask",
            StateField::IsInFlow => "isInFlow",
            StateField::BlockDistractions => "blockDistractions",
            StateField::BreakReminderEnabled => "breakReminderEnabled",
            StateField::DistractingSites => "distractingSites",
            StateField::DeepWorkBlockedSites => "deepWorkBlockedSites",
            StateField::ReminderStartTime => "reminderStartTime",
            StateField::ReminderInterval => "reminderInterval",
            StateField::ReminderExpectedEndTime => "reminderExpectedEndTime",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    pub fn is_known(key: &str) -> bool {
        Self::from_key(key).is_some()
    }
}

/// The canonical shared record. Field names serialize in the camelCase form
/// every context reads from the store and the message channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusState {
    pub is_enabled: bool,
    pub interaction_level: InteractionLevel,
    /// Empty string means "no task".
    pub current_task: String,
    pub is_in_flow: bool,
    pub block_distractions: bool,
    pub break_reminder_enabled: bool,
    pub distracting_sites: Vec<String>,
    pub deep_work_blocked_sites: Vec<String>,
    #[serde(serialize_with = "serialize_timing")]
    pub reminder_start_time: Option<f64>,
    #[serde(serialize_with = "serialize_timing")]
    pub reminder_interval: Option<f64>,
    #[serde(serialize_with = "serialize_timing")]
    pub reminder_expected_end_time: Option<f64>,
}

impl Default for FocusState {
    fn default() -> Self {
        Self {
            is_enabled: true,
            interaction_level: InteractionLevel::Balanced,
            current_task: String::new(),
            is_in_flow: false,
            block_distractions: true,
            break_reminder_enabled: true,
            distracting_sites: default_distracting_sites(),
            deep_work_blocked_sites: default_deepwork_blocked_sites(),
            reminder_start_time: None,
            reminder_interval: None,
            reminder_expected_end_time: None,
        }
    }
}

pub fn default_distracting_sites() -> Vec<String> {
    DEFAULT_DISTRACTING_SITES.iter().map(|s| s.to_string()).collect()
}

pub fn default_deepwork_blocked_sites() -> Vec<String> {
    DEFAULT_DEEPWORK_BLOCKED_SITES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Largest integer every JSON consumer can represent exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Whole numbers are written as JSON integers so a stored `1000` reads back
/// as `1000`, not `1000.0`.
fn number_or_null(value: Option<f64>) -> Value {
    match value {
        None => Value::Null,
        Some(v) if v.fract() == 0.0 && v.abs() <= MAX_EXACT_INTEGER => Value::from(v as i64),
        Some(v) => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
    }
}

fn serialize_timing<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    number_or_null(*value).serialize(serializer)
}

impl FocusState {
    /// JSON value of a single field.
    pub fn get(&self, field: StateField) -> Value {
        match field {
            StateField::IsEnabled => Value::Bool(self.is_enabled),
            StateField::InteractionLevel => {
                Value::String(self.interaction_level.key().to_string())
            }
            StateField::CurrentTask => Value::String(self.current_task.clone()),
            StateField::IsInFlow => Value::Bool(self.is_in_flow),
            StateField::BlockDistractions => Value::Bool(self.block_distractions),
            StateField::BreakReminderEnabled => Value::Bool(self.break_reminder_enabled),
            StateField::DistractingSites => Value::from(self.distracting_sites.clone()),
            StateField::DeepWorkBlockedSites => {
                Value::from(self.deep_work_blocked_sites.clone())
            }
            StateField::ReminderStartTime => number_or_null(self.reminder_start_time),
            StateField::ReminderInterval => number_or_null(self.reminder_interval),
            StateField::ReminderExpectedEndTime => {
                number_or_null(self.reminder_expected_end_time)
            }
        }
    }

    /// Replaces one field with `candidate`, coerced against `fallback`'s value
    /// for that same field.
    pub fn assign(&mut self, field: StateField, candidate: &Value, fallback: &FocusState) {
        match field {
            StateField::IsEnabled => {
                self.is_enabled = normalize_bool(candidate, fallback.is_enabled)
            }
            StateField::InteractionLevel => {
                self.interaction_level = normalize_enum(
                    candidate,
                    fallback.interaction_level,
                    &InteractionLevel::ALL,
                )
            }
            StateField::CurrentTask => {
                self.current_task = normalize_string(candidate, &fallback.current_task)
            }
            StateField::IsInFlow => self.is_in_flow = normalize_bool(candidate, fallback.is_in_flow),
            StateField::BlockDistractions => {
                self.block_distractions = normalize_bool(candidate, fallback.block_distractions)
            }
            StateField::BreakReminderEnabled => {
                self.break_reminder_enabled =
                    normalize_bool(candidate, fallback.break_reminder_enabled)
            }
            StateField::DistractingSites => {
                self.distracting_sites =
                    normalize_string_list(candidate, &fallback.distracting_sites)
            }
            StateField::DeepWorkBlockedSites => {
                self.deep_work_blocked_sites =
                    normalize_string_list(candidate, &fallback.deep_work_blocked_sites)
            }
            StateField::ReminderStartTime => {
                self.reminder_start_time =
                    normalize_nullable_finite_number(candidate, fallback.reminder_start_time)
            }
            StateField::ReminderInterval => {
                self.reminder_interval =
                    normalize_nullable_finite_number(candidate, fallback.reminder_interval)
            }
            StateField::ReminderExpectedEndTime => {
                self.reminder_expected_end_time = normalize_nullable_finite_number(
                    candidate,
                    fallback.reminder_expected_end_time,
                )
            }
        }
    }

    /// Fields whose value differs between `self` and `next`, in schema order.
    pub fn changed_fields(&self, next: &FocusState) -> Vec<StateField> {
        StateField::ALL
            .into_iter()
            .filter(|field| match field {
                StateField::IsEnabled => self.is_enabled != next.is_enabled,
                StateField::InteractionLevel => self.interaction_level != next.interaction_level,
                StateField::CurrentTask => self.current_task != next.current_task,
                StateField::IsInFlow => self.is_in_flow != next.is_in_flow,
                StateField::BlockDistractions => self.block_distractions != next.block_distractions,
                StateField::BreakReminderEnabled => {
                    self.break_reminder_enabled != next.break_reminder_enabled
                }
                StateField::DistractingSites => self.distracting_sites != next.distracting_sites,
                StateField::DeepWorkBlockedSites => {
                    self.deep_work_blocked_sites != next.deep_work_blocked_sites
                }
                StateField::ReminderStartTime => {
                    self.reminder_start_time != next.reminder_start_time
                }
                StateField::ReminderInterval => self.reminder_interval != next.reminder_interval,
                StateField::ReminderExpectedEndTime => {
                    self.reminder_expected_end_time != next.reminder_expected_end_time
                }
            })
            .collect()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.project(&StateField::ALL)
    }

    /// Mapping restricted to `fields`.
    pub fn project(&self, fields: &[StateField]) -> Map<String, Value> {
        fields
            .iter()
            .map(|field| (field.key().to_string(), self.get(*field)))
            .collect()
    }
}
