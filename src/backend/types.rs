use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field injected into every output line to record the owning conversation.
pub const SOURCE_ID_FIELD: &str = "cid";

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page; an empty cursor string means there are no more pages.
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// A conversation entry from the directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_im: bool,
    /// The other participant of a 1:1 direct conversation
    #[serde(default)]
    pub user: Option<String>,
}

impl SourceInfo {
    pub fn channel(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn direct(id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_im: true,
            user: Some(user.into()),
            ..Default::default()
        }
    }
}

/// A raw message payload. Only `ts` is ever interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRecord(pub Map<String, Value>);

impl MessageRecord {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Message timestamp in seconds. Slack sends `ts` as a decimal string.
    pub fn timestamp(&self) -> Option<f64> {
        let ts: f64 = match self.0.get("ts")? {
            Value::String(s) => s.trim().parse().ok()?,
            Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        ts.is_finite().then_some(ts)
    }

    /// The output line representation: raw fields plus the owning source id.
    pub fn tagged(&self, source_id: &str) -> Map<String, Value> {
        let mut fields = self.0.clone();
        fields.insert(
            SOURCE_ID_FIELD.to_string(),
            Value::String(source_id.to_string()),
        );
        fields
    }
}

impl From<Value> for MessageRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => MessageRecord(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                MessageRecord(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_from_string_and_number() {
        let from_str = MessageRecord::from(json!({"ts": "1700000000.123456"}));
        assert_eq!(from_str.timestamp(), Some(1700000000.123456));

        let from_num = MessageRecord::from(json!({"ts": 1700000001.5}));
        assert_eq!(from_num.timestamp(), Some(1700000001.5));
    }

    #[test]
    fn test_timestamp_missing_or_garbage() {
        assert_eq!(MessageRecord::from(json!({"text": "hi"})).timestamp(), None);
        assert_eq!(MessageRecord::from(json!({"ts": "soon"})).timestamp(), None);
        assert_eq!(MessageRecord::from(json!({"ts": "NaN"})).timestamp(), None);
    }

    #[test]
    fn test_tagged_injects_source_id_and_keeps_fields() {
        let record = MessageRecord::from(json!({"ts": "1.0", "text": "hello", "user": "U1"}));
        let tagged = record.tagged("C42");
        assert_eq!(tagged["cid"], "C42");
        assert_eq!(tagged["text"], "hello");
        assert_eq!(tagged["user"], "U1");
        assert_eq!(tagged["ts"], "1.0");
    }

    #[test]
    fn test_page_normalizes_empty_cursor() {
        let page: Page<u8> = Page::new(vec![1], Some(String::new()));
        assert!(page.next_cursor.is_none());
        let page: Page<u8> = Page::new(vec![1], Some("abc".to_string()));
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_source_info_deserializes_slack_shapes() {
        let im: SourceInfo =
            serde_json::from_value(json!({"id": "D1", "is_im": true, "user": "U9", "created": 1}))
                .unwrap();
        assert_eq!(im, SourceInfo::direct("D1", "U9"));

        let channel: SourceInfo =
            serde_json::from_value(json!({"id": "C1", "name": "general", "is_channel": true}))
                .unwrap();
        assert_eq!(channel, SourceInfo::channel("C1", "general"));
    }
}
