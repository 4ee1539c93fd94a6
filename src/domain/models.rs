use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FOCUS_SECONDS_RANGE: (u32, u32) = (300, 7200);
pub const SMALL_BREAK_SECONDS_RANGE: (u32, u32) = (60, 1800);
pub const BIG_BREAK_SECONDS_RANGE: (u32, u32) = (300, 3600);
pub const SESSIONS_PER_CYCLE_RANGE: (u32, u32) = (1, 12);

/// An authenticated principal as reported by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Monthly,
    Yearly,
    Lifetime,
}

impl SubscriptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Lifetime => "lifetime",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "lifetime" => Some(Self::Lifetime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub kind: SubscriptionType,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Identity-linked profile record. The default value is the "empty" profile,
/// which stands for "no authenticated identity".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub display_name: String,
    pub is_name_set: bool,
    pub is_premium: bool,
    pub subscription: Option<Subscription>,
    pub last_receipt_data: Option<String>,
}

impl UserProfile {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fresh record for an identity seen for the first time.
    pub fn new_for(identity: &Identity, created_at: DateTime<Utc>) -> Self {
        Self {
            id: identity.uid.clone(),
            created_at,
            email: identity.email.clone(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        if !self.is_premium {
            return false;
        }
        match &self.subscription {
            Some(Subscription {
                kind: SubscriptionType::Lifetime,
                ..
            }) => true,
            Some(subscription) => subscription.end_date.is_some_and(|end| end > now),
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "profile.id")?;
        if self.is_name_set {
            validate_non_empty(&self.display_name, "profile.display_name")?;
        }
        if let Some(Subscription {
            start_date: Some(start),
            end_date: Some(end),
            ..
        }) = &self.subscription
        {
            if end < start {
                return Err("profile.subscription.end_date must be >= start_date".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Focus,
    SmallBreak,
    BigBreak,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::SmallBreak => "small_break",
            Self::BigBreak => "big_break",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerConfig {
    pub focus_seconds: u32,
    pub small_break_seconds: u32,
    pub big_break_seconds: u32,
    pub sessions_per_cycle: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            focus_seconds: 25 * 60,
            small_break_seconds: 5 * 60,
            big_break_seconds: 15 * 60,
            sessions_per_cycle: 4,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_range(self.focus_seconds, FOCUS_SECONDS_RANGE, "timer.focus_seconds")?;
        validate_range(
            self.small_break_seconds,
            SMALL_BREAK_SECONDS_RANGE,
            "timer.small_break_seconds",
        )?;
        validate_range(
            self.big_break_seconds,
            BIG_BREAK_SECONDS_RANGE,
            "timer.big_break_seconds",
        )?;
        validate_range(
            self.sessions_per_cycle,
            SESSIONS_PER_CYCLE_RANGE,
            "timer.sessions_per_cycle",
        )
    }

    pub fn duration_for(&self, phase: TimerPhase) -> u32 {
        match phase {
            TimerPhase::Focus => self.focus_seconds,
            TimerPhase::SmallBreak => self.small_break_seconds,
            TimerPhase::BigBreak => self.big_break_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub phase: TimerPhase,
    pub remaining_seconds: u32,
    pub session_index: u32,
    pub running: bool,
}

impl TimerState {
    pub fn initial(config: &TimerConfig) -> Self {
        Self {
            phase: TimerPhase::Focus,
            remaining_seconds: config.focus_seconds,
            session_index: 1,
            running: false,
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_range(value: u32, (min, max): (u32, u32), field_name: &str) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("{field_name} must be within [{min}, {max}], got {value}"));
    }
    Ok(())
}
