//! Descriptor record published in place of the payload.

use crate::payload::PayloadKind;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Reserved extension header
///
/// No fields are defined yet; descriptors carry `"header": null` until one is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorHeader {}

/// Metadata record that points subscribers at a stored payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub topic: String,
    pub storage_address: String,
    pub storage_port: String,
    /// Payload kind label
    pub data_type: PayloadKind,
    /// Object name or file path of the stored payload
    pub locator: String,
    /// RFC 3339 UTC, second precision
    pub timestamp: String,
    pub header: Option<DescriptorHeader>,
}

impl Descriptor {
    /// Assemble a descriptor. Pure; performs no I/O.
    pub fn build(
        topic: impl Into<String>,
        storage_address: impl Into<String>,
        storage_port: impl Into<String>,
        kind: PayloadKind,
        locator: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            storage_address: storage_address.into(),
            storage_port: storage_port.into(),
            data_type: kind,
            locator: locator.into(),
            timestamp: format_timestamp(now),
            header: None,
        }
    }

    /// Parse the timestamp back into a `DateTime`
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Format a capture time the way descriptors carry it
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_year() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_build_descriptor() {
        let descriptor = Descriptor::build(
            "sensors",
            "minio.local",
            "9000",
            PayloadKind::TinyData,
            "0b1c8f4e-7f0e-4c1a-9d55-6f8f2e3b9a10",
            new_year(),
        );

        assert_eq!(descriptor.timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(descriptor.captured_at(), Some(new_year()));
        assert!(descriptor.header.is_none());
    }

    #[test]
    fn test_wire_format() {
        let descriptor = Descriptor::build(
            "sensors",
            "minio.local",
            "9000",
            PayloadKind::TinyData,
            "obj-1",
            new_year(),
        );

        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "topic": "sensors",
                "storage_address": "minio.local",
                "storage_port": "9000",
                "data_type": "tiny_data",
                "locator": "obj-1",
                "timestamp": "2024-01-01T00:00:00Z",
                "header": null
            })
        );
    }

    #[test]
    fn test_decode_unknown_kind() {
        let json = r#"{
            "topic": "audio",
            "storage_address": "minio.local",
            "storage_port": "9000",
            "data_type": "audio",
            "locator": "obj-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "header": null
        }"#;

        let descriptor: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.data_type, PayloadKind::Unknown("audio".to_string()));
    }
}
