//! CloudKit photo catalog queries and record parsing.
//!
//! Each catalog page returns `CPLMaster` records (filename, original
//! resource) and `CPLAsset` records (dates) linked by `masterRef`; a
//! [`RemoteItem`] is built from each matched pair.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use super::error::ICloudError;
use super::types::RemoteItem;
use crate::download::paths;

pub(crate) const PAGE_SIZE: usize = 100;

/// Every non-hidden, non-deleted asset in the primary library.
const LIST_TYPE: &str = "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted";
const COUNT_INDEX: &str = "CPLAssetByAssetDateWithoutHiddenOrDeleted";

/// CloudKit field names requested in every query.
const DESIRED_KEYS: &[&str] = &[
    "recordName",
    "recordType",
    "masterRef",
    "filenameEnc",
    "itemType",
    "resOriginalRes",
    "resOriginalFileType",
    "assetDate",
    "addedDate",
    "isDeleted",
    "isHidden",
];

/// Map UTI file types to the extension used for fingerprint filenames.
const ITEM_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("public.heic", "HEIC"),
    ("public.heif", "HEIF"),
    ("public.jpeg", "JPG"),
    ("public.png", "PNG"),
    ("com.apple.quicktime-movie", "MOV"),
    ("com.adobe.raw-image", "DNG"),
];

/// Root of the private photos database under a `ckdatabasews` URL.
pub(crate) fn database_endpoint(ckdatabasews_url: &str) -> String {
    format!("{ckdatabasews_url}/database/1/com.apple.photos.cloud/production/private")
}

/// Body of a `records/query` request for the page starting at `offset`.
pub(crate) fn list_query(offset: u64) -> Value {
    json!({
        "query": {
            "filterBy": [
                {
                    "fieldName": "startRank",
                    "fieldValue": {"type": "INT64", "value": offset},
                    "comparator": "EQUALS",
                },
                {
                    "fieldName": "direction",
                    "fieldValue": {"type": "STRING", "value": "ASCENDING"},
                    "comparator": "EQUALS",
                },
            ],
            "recordType": LIST_TYPE,
        },
        // Each item arrives as two records (master + asset)
        "resultsLimit": PAGE_SIZE * 2,
        "desiredKeys": DESIRED_KEYS,
        "zoneID": {"zoneName": "PrimarySync"},
    })
}

/// Body of the `HyperionIndexCountLookup` request returning the item total.
pub(crate) fn count_query() -> Value {
    json!({
        "batch": [{
            "resultsLimit": 1,
            "query": {
                "filterBy": {
                    "fieldName": "indexCountID",
                    "fieldValue": {"type": "STRING_LIST", "value": [COUNT_INDEX]},
                    "comparator": "IN",
                },
                "recordType": "HyperionIndexCountLookup",
            },
            "zoneWide": true,
            "zoneID": {"zoneName": "PrimarySync"},
        }]
    })
}

pub(crate) fn parse_count(response: &Value) -> Option<u64> {
    response["batch"][0]["records"][0]["fields"]["itemCount"]["value"].as_u64()
}

/// One decoded page of the catalog.
#[derive(Debug)]
pub(crate) struct CatalogPage {
    /// Master records seen; the next page starts this many ranks later.
    pub masters: usize,
    pub items: Vec<Result<RemoteItem, ICloudError>>,
}

/// Split a `records/query` response into items, in master-record order.
pub(crate) fn parse_page(mut response: Value) -> CatalogPage {
    let records = match response.get_mut("records").and_then(|v| v.as_array_mut()) {
        Some(r) => std::mem::take(r),
        None => {
            tracing::debug!("No 'records' field in catalog response");
            return CatalogPage {
                masters: 0,
                items: Vec::new(),
            };
        }
    };

    let mut asset_records: HashMap<String, Value> = HashMap::new();
    let mut master_records: Vec<Value> = Vec::new();
    for rec in records {
        match rec["recordType"].as_str() {
            Some("CPLAsset") => {
                if let Some(master_id) = rec["fields"]["masterRef"]["value"]["recordName"].as_str() {
                    asset_records.insert(master_id.to_string(), rec);
                }
            }
            Some("CPLMaster") => master_records.push(rec),
            _ => {}
        }
    }

    let masters = master_records.len();
    let items = master_records
        .iter()
        .filter_map(|master| {
            let id = master["recordName"].as_str().unwrap_or_default();
            match asset_records.get(id) {
                Some(asset) => Some(parse_item(master, asset)),
                None => {
                    tracing::debug!(id, "Master record without asset record, skipping");
                    None
                }
            }
        })
        .collect();

    CatalogPage { masters, items }
}

fn malformed(record: &str, reason: &str) -> ICloudError {
    ICloudError::MalformedRecord {
        record: record.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_item(master: &Value, asset: &Value) -> Result<RemoteItem, ICloudError> {
    let id = master["recordName"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed("<unnamed>", "missing recordName"))?;
    let fields = &master["fields"];

    let original = &fields["resOriginalRes"]["value"];
    let content_location = original["downloadURL"]
        .as_str()
        .ok_or_else(|| malformed(id, "missing resOriginalRes.downloadURL"))?
        .to_string();
    let size = original["size"].as_u64();

    let filename = match decode_filename(&fields["filenameEnc"]) {
        Some(name) if paths::is_usable_filename(&name) => name,
        _ => {
            let file_type = fields["resOriginalFileType"]["value"].as_str().unwrap_or("");
            fingerprint_filename(id, file_type)
        }
    };

    let asset_date = millis_field(&asset["fields"]["assetDate"]);
    let added_date = millis_field(&asset["fields"]["addedDate"])
        .ok_or_else(|| malformed(id, "missing addedDate"))?;

    Ok(RemoteItem {
        id: id.to_string(),
        filename,
        size,
        asset_date,
        added_date,
        content_location,
    })
}

fn millis_field(field: &Value) -> Option<DateTime<Utc>> {
    field["value"]
        .as_f64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
}

/// Decode `filenameEnc`, which is either a plain string or base64 bytes.
fn decode_filename(enc: &Value) -> Option<String> {
    let value = enc["value"].as_str()?;
    match enc["type"].as_str().unwrap_or("STRING") {
        "STRING" => Some(value.to_string()),
        "ENCRYPTED_BYTES" => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(value)
                .ok()?;
            String::from_utf8(decoded).ok()
        }
        other => {
            tracing::warn!("Unsupported filenameEnc type: {}", other);
            None
        }
    }
}

/// Fallback name for records without a usable `filenameEnc`: the first 12 characters
/// of the id with non-alphanumerics replaced, plus the type's extension.
fn fingerprint_filename(id: &str, file_type: &str) -> String {
    let fingerprint: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(12)
        .collect();
    let ext = ITEM_TYPE_EXTENSIONS
        .iter()
        .find(|(uti, _)| *uti == file_type)
        .map_or("unknown", |(_, ext)| *ext);
    format!("{}.{}", fingerprint, ext)
}
