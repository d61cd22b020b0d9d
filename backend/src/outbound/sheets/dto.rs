//! DTOs for the values-range REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ports::Row;

/// Body of a values read response and of write/append requests.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ValueRangeDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) major_dimension: Option<String>,
    #[serde(default)]
    pub(super) values: Vec<Vec<Value>>,
}

impl ValueRangeDto {
    pub(super) fn rows(range: String, values: &[Row]) -> Self {
        Self {
            range: Some(range),
            major_dimension: Some("ROWS".to_owned()),
            values: values.to_vec(),
        }
    }

    pub(super) fn into_rows(self) -> Vec<Row> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_values_decode_as_no_rows() {
        let decoded: ValueRangeDto =
            serde_json::from_value(json!({"range": "Users!A9:E9", "majorDimension": "ROWS"}))
                .expect("decode");
        assert!(decoded.into_rows().is_empty());
    }

    #[test]
    fn write_bodies_use_row_major_order() {
        let body = ValueRangeDto::rows("'Users'!A2:B2".to_owned(), &[vec![json!("1"), json!(true)]]);
        assert_eq!(
            serde_json::to_value(&body).expect("encode"),
            json!({"range": "'Users'!A2:B2", "majorDimension": "ROWS", "values": [["1", true]]})
        );
    }
}
