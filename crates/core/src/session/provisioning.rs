//! Provisioning profile parsing.
//!
//! A `.mobileprovision` file is a CMS envelope around an XML plist. The plist
//! is cut out of the envelope and decoded with `plist`; a bare binary plist is
//! decoded as is.

use std::io::Cursor;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use serde::Serialize;
use tracing::debug;

const BINARY_MAGIC: &[u8] = b"bplist00";

/// Fields recovered from a provisioning profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningProfile {
    pub name: Option<String>,
    pub team_name: Option<String>,
    pub uuid: Option<String>,
    pub app_id_name: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: DateTime<Utc>,
}

/// Parse profile bytes. Returns `None` without a readable expiration date.
pub fn parse_profile(data: &[u8]) -> Option<ProvisioningProfile> {
    let value = decode(data)?;
    let dict = value.as_dictionary()?;

    let expiration_date = date_value(dict, "ExpirationDate")?;

    Some(ProvisioningProfile {
        name: string_value(dict, "Name"),
        team_name: string_value(dict, "TeamName"),
        uuid: string_value(dict, "UUID"),
        app_id_name: string_value(dict, "AppIDName"),
        creation_date: date_value(dict, "CreationDate"),
        expiration_date,
    })
}

/// Read and parse the profile the tool wrote, if it wrote one.
pub async fn read_profile(path: &Path) -> Option<ProvisioningProfile> {
    let data = tokio::fs::read(path).await.ok()?;
    if data.is_empty() {
        return None;
    }
    parse_profile(&data)
}

fn decode(data: &[u8]) -> Option<Value> {
    let result = if data.starts_with(BINARY_MAGIC) {
        Value::from_reader(Cursor::new(data))
    } else {
        Value::from_reader_xml(extract_xml(data)?)
    };
    result
        .map_err(|e| debug!(error = %e, "Provisioning profile is not a readable plist"))
        .ok()
}

fn extract_xml(data: &[u8]) -> Option<&[u8]> {
    let start = position(data, b"<?xml").or_else(|| position(data, b"<plist"))?;
    let end_tag = b"</plist>";
    let end = start + position(&data[start..], end_tag)? + end_tag.len();
    Some(&data[start..end])
}

fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn string_value(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key)
        .and_then(Value::as_string)
        .map(|s| s.trim().to_string())
}

fn date_value(dict: &Dictionary, key: &str) -> Option<DateTime<Utc>> {
    let date = dict.get(key)?.as_date()?;
    Some(DateTime::<Utc>::from(SystemTime::from(date)))
}
