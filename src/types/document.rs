use serde_json::Value;

/// Walks a dotted path (`a.b.0.c`) through objects and arrays.
///
/// Each segment is an object key, or an index when the current node is an
/// array. Returns `None` as soon as a segment does not resolve.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String leaf at `path`; numbers are rendered as text.
pub fn lookup_str(doc: &Value, path: &str) -> Option<String> {
    match lookup(doc, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer leaf at `path`; numeric strings are accepted.
pub fn lookup_i64(doc: &Value, path: &str) -> Option<i64> {
    match lookup(doc, path)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
