use crate::domain::models::{Subscription, SubscriptionType, UserProfile};
use crate::infrastructure::error::StoreError;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const FIELD_ID: &str = "id";
pub const FIELD_ADDED_DATE_TIME: &str = "addedDateTime";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_NAME: &str = "name";
pub const FIELD_IS_NAME_SET: &str = "isUserNameSet";
pub const FIELD_IS_PREMIUM: &str = "isPremium";
pub const FIELD_SUBSCRIPTION_TYPE: &str = "subscriptionType";
pub const FIELD_SUBSCRIPTION_START: &str = "subscriptionStartDate";
pub const FIELD_SUBSCRIPTION_END: &str = "subscriptionEndDate";
pub const FIELD_LAST_RECEIPT: &str = "lastReceiptData";

/// Older clients wrote `addedDateTime` in this layout instead of RFC 3339.
const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDocument {
    added_date_time: Option<String>,
    email: Option<String>,
    name: Option<String>,
    is_user_name_set: Option<bool>,
    is_premium: Option<bool>,
    subscription_type: Option<String>,
    subscription_start_date: Option<String>,
    subscription_end_date: Option<String>,
    last_receipt_data: Option<String>,
}

/// How strictly `isPremium` is required when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Point reads: a missing `isPremium` means not premium.
    Fetch,
    /// Live updates: every core field must be present.
    LiveUpdate,
}

pub fn encode_profile(profile: &UserProfile) -> Value {
    let subscription = profile.subscription.as_ref();
    serde_json::json!({
        FIELD_ID: profile.id,
        FIELD_ADDED_DATE_TIME: profile.created_at.to_rfc3339(),
        FIELD_EMAIL: profile.email,
        FIELD_NAME: profile.display_name,
        FIELD_IS_NAME_SET: profile.is_name_set,
        FIELD_IS_PREMIUM: profile.is_premium,
        FIELD_SUBSCRIPTION_TYPE: subscription.map(|value| value.kind.as_str()),
        FIELD_SUBSCRIPTION_START: subscription
            .and_then(|value| value.start_date)
            .map(|date| date.to_rfc3339()),
        FIELD_SUBSCRIPTION_END: subscription
            .and_then(|value| value.end_date)
            .map(|date| date.to_rfc3339()),
        FIELD_LAST_RECEIPT: profile.last_receipt_data,
    })
}

/// Decodes the stored record of user `id`. The document key is authoritative
/// for the id, not the `id` field inside the record.
pub fn decode_profile(id: &str, record: &Value, mode: DecodeMode) -> Result<UserProfile, StoreError> {
    let document: ProfileDocument = serde_json::from_value(record.clone())
        .map_err(|error| StoreError::Malformed(format!("user {id}: {error}")))?;

    let added_date_time = required(document.added_date_time, id, FIELD_ADDED_DATE_TIME)?;
    let email = required(document.email, id, FIELD_EMAIL)?;
    let name = required(document.name, id, FIELD_NAME)?;
    let is_name_set = required(document.is_user_name_set, id, FIELD_IS_NAME_SET)?;
    let is_premium = match mode {
        DecodeMode::Fetch => document.is_premium.unwrap_or(false),
        DecodeMode::LiveUpdate => required(document.is_premium, id, FIELD_IS_PREMIUM)?,
    };

    let subscription = match document.subscription_type.as_deref() {
        None => None,
        Some(raw) => {
            let kind = SubscriptionType::parse(raw).ok_or_else(|| {
                StoreError::Malformed(format!("user {id}: unknown subscription type {raw:?}"))
            })?;
            Some(Subscription {
                kind,
                start_date: optional_date(document.subscription_start_date, id, FIELD_SUBSCRIPTION_START)?,
                end_date: optional_date(document.subscription_end_date, id, FIELD_SUBSCRIPTION_END)?,
            })
        }
    };

    Ok(UserProfile {
        id: id.to_string(),
        created_at: parse_date(&added_date_time, id, FIELD_ADDED_DATE_TIME)?,
        email,
        display_name: name,
        is_name_set,
        is_premium,
        subscription,
        last_receipt_data: document.last_receipt_data,
    })
}

/// Reads the `name` field without decoding the whole record.
pub fn record_name(record: &Value) -> Option<&str> {
    record.get(FIELD_NAME).and_then(Value::as_str)
}

fn required<T>(value: Option<T>, id: &str, field: &str) -> Result<T, StoreError> {
    value.ok_or_else(|| StoreError::Malformed(format!("user {id}: missing {field}")))
}

fn optional_date(
    value: Option<String>,
    id: &str,
    field: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| parse_date(raw, id, field))
        .transpose()
}

fn parse_date(raw: &str, id: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, LEGACY_DATE_FORMAT))
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| StoreError::Malformed(format!("user {id}: invalid {field} {raw:?}")))
}
