use chrono::{DateTime, Utc};

use super::responses::TrustedDeviceRecord;

/// A media item from the account's photo catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    pub filename: String,
    /// Size in bytes of the original resource, when the record states it.
    pub size: Option<u64>,
    /// When the photo or video was taken. Absent when Apple could not
    /// extract it.
    pub asset_date: Option<DateTime<Utc>>,
    /// When the item was added to the library.
    pub added_date: DateTime<Utc>,
    /// URL of the original bytes.
    pub content_location: String,
}

/// A device that can receive a two-step verification code.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustedDevice {
    pub index: usize,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub(crate) record: TrustedDeviceRecord,
}

impl TrustedDevice {
    /// Name shown to the user: the device name, or an SMS description for
    /// phone-number-only devices.
    pub fn from_record(index: usize, record: TrustedDeviceRecord) -> Self {
        let display_name = match (&record.device_name, &record.phone_number) {
            (Some(name), _) => name.clone(),
            (None, Some(phone)) => format!("SMS to {}", phone),
            (None, None) => "SMS to unknown".to_string(),
        };
        Self {
            index,
            display_name,
            phone_number: record.phone_number.clone(),
            record,
        }
    }
}

impl std::fmt::Display for TrustedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.index, self.display_name)
    }
}
