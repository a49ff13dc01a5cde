use crate::error::CrmError;
use crate::types::document::{lookup, lookup_i64, lookup_str};
use serde_json::{Map, Value};

/// The `leads.status.0` entry of an amoCRM webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadStatusEvent {
    pub lead_id: i64,
    pub lead_name: Option<String>,
    pub pipeline_id: i64,
    pub status_id: i64,
}

impl LeadStatusEvent {
    /// Extract the first lead status change, if the hook carries one.
    pub fn from_document(doc: &Value) -> Option<Self> {
        let status = lookup(doc, "leads.status.0")?;
        Some(Self {
            lead_id: lookup_i64(status, "id")?,
            lead_name: lookup_str(status, "name"),
            pipeline_id: lookup_i64(status, "pipeline_id")?,
            status_id: lookup_i64(status, "status_id")?,
        })
    }
}

/// Deepest bracket nesting accepted in a form key. Real hooks use four.
const MAX_KEY_DEPTH: usize = 32;

/// Decode a webhook body into a document.
///
/// amoCRM posts `application/x-www-form-urlencoded` with bracketed keys;
/// JSON bodies are accepted as well.
pub fn decode_hook_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, CrmError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(CrmError::InvalidRequest("empty body".to_string()));
    }
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    if is_json {
        return serde_json::from_slice(body).map_err(|e| CrmError::InvalidRequest(e.to_string()));
    }
    form_to_document(body)
}

/// Nest `a[b][0][c]=v` pairs into `{"a": {"b": {"0": {"c": "v"}}}}`.
pub fn form_to_document(body: &[u8]) -> Result<Value, CrmError> {
    let mut root = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        let segments = split_key(&key)?;
        insert_path(&mut root, &segments, value.into_owned());
    }
    Ok(Value::Object(root))
}

fn split_key(key: &str) -> Result<Vec<String>, CrmError> {
    let Some(open) = key.find('[') else {
        return Ok(vec![key.to_string()]);
    };
    if key.matches('[').count() > MAX_KEY_DEPTH {
        return Err(CrmError::InvalidRequest(format!(
            "form key nested deeper than {MAX_KEY_DEPTH} levels"
        )));
    }
    let mut segments = vec![key[..open].to_string()];
    segments.extend(
        key[open..]
            .split('[')
            .skip(1)
            .map(|part| part.trim_end_matches(']').to_string()),
    );
    Ok(segments)
}

fn insert_path(root: &mut Map<String, Value>, segments: &[String], value: String) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cursor = root;
    for segment in parents {
        let key = entry_key(cursor, segment);
        let child = cursor
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        let Value::Object(inner) = child else {
            return;
        };
        cursor = inner;
    }
    let key = entry_key(cursor, last);
    cursor.insert(key, Value::String(value));
}

// `a[]=x` appends
fn entry_key(map: &Map<String, Value>, segment: &str) -> String {
    if segment.is_empty() {
        map.len().to_string()
    } else {
        segment.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nests_bracketed_form_keys() {
        let body = b"leads%5Bstatus%5D%5B0%5D%5Bid%5D=26378833&leads[status][0][name]=Lead+one&account[subdomain]=school";
        let doc = form_to_document(body).unwrap();
        assert_eq!(
            doc,
            json!({
                "leads": {"status": {"0": {"id": "26378833", "name": "Lead one"}}},
                "account": {"subdomain": "school"}
            })
        );
    }

    #[test]
    fn empty_brackets_append() {
        let doc = form_to_document(b"tags[]=a&tags[]=b").unwrap();
        assert_eq!(doc, json!({"tags": {"0": "a", "1": "b"}}));
    }

    #[test]
    fn extracts_status_event_from_form_hook() {
        let body = b"leads[status][0][id]=26378833&leads[status][0][name]=Ivan&leads[status][0][pipeline_id]=1309792&leads[status][0][status_id]=21234451";
        let doc = decode_hook_body(Some("application/x-www-form-urlencoded"), body).unwrap();
        let event = LeadStatusEvent::from_document(&doc).unwrap();
        assert_eq!(
            event,
            LeadStatusEvent {
                lead_id: 26378833,
                lead_name: Some("Ivan".to_string()),
                pipeline_id: 1309792,
                status_id: 21234451,
            }
        );
    }

    #[test]
    fn extracts_status_event_from_json_hook() {
        let body = br#"{"leads":{"status":[{"id":5,"pipeline_id":7,"status_id":9}]}}"#;
        let doc = decode_hook_body(Some("application/json"), body).unwrap();
        let event = LeadStatusEvent::from_document(&doc).unwrap();
        assert_eq!(event.lead_id, 5);
        assert_eq!(event.lead_name, None);
    }

    #[test]
    fn hooks_without_status_yield_no_event() {
        let doc = form_to_document(b"leads[add][0][id]=1").unwrap();
        assert!(LeadStatusEvent::from_document(&doc).is_none());
    }

    #[test]
    fn rejects_empty_and_malformed_bodies() {
        assert!(matches!(
            decode_hook_body(None, b"  "),
            Err(CrmError::InvalidRequest(_))
        ));
        assert!(matches!(
            decode_hook_body(Some("application/json"), b"{"),
            Err(CrmError::InvalidRequest(_))
        ));
    }

    #[test]
    fn deeply_nested_keys_are_rejected() {
        let mut body = String::from("a");
        body.push_str(&"[b]".repeat(200_000));
        body.push_str("=x");
        assert!(matches!(
            decode_hook_body(None, body.as_bytes()),
            Err(CrmError::InvalidRequest(_))
        ));

        let at_limit = format!("a{}=x", "[b]".repeat(MAX_KEY_DEPTH));
        let doc = form_to_document(at_limit.as_bytes()).unwrap();
        let path = format!("a{}", ".b".repeat(MAX_KEY_DEPTH));
        assert_eq!(lookup_str(&doc, &path).as_deref(), Some("x"));
    }
}
