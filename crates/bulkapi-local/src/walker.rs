//! Generic JSON-tree walking helpers (spec.md §4.3: DataWalker): `crawl_for_key` and
//! `get_path`, implemented as explicit recursive functions — Rust has no native generators,
//! so `crawl_for_key` collects into a `Vec` rather than yielding lazily.

/// Depth-first, pre-order-at-match-point walk of `value`, yielding every `(dotted_path,
/// &Value)` pair whose final path segment equals `key`. Matches stop descending into
/// themselves but sibling branches are still explored; a dict value and a list value are
/// both walked, with list indices rendered as path segments.
///
/// ```
/// use serde_json::json;
/// let v = json!({"a": {"slug": "x"}, "b": [{"slug": "y"}, {"c": {"slug": "z"}}]});
/// let found = bulkapi_local::crawl_for_key(&v, "slug");
/// let paths: Vec<&str> = found.iter().map(|(p, _)| p.as_str()).collect();
/// assert_eq!(paths, vec!["a.slug", "b.0.slug", "b.1.c.slug"]);
/// ```
pub fn crawl_for_key<'a>(value: &'a serde_json::Value, key: &str) -> Vec<(String, &'a serde_json::Value)> {
    let mut out = Vec::new();
    crawl_for_key_inner(value, key, String::new(), &mut out);
    out
}

fn crawl_for_key_inner<'a>(
    value: &'a serde_json::Value,
    key: &str,
    prefix: String,
    out: &mut Vec<(String, &'a serde_json::Value)>,
) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let path = join_path(&prefix, k);
                if k == key {
                    out.push((path, v));
                } else {
                    crawl_for_key_inner(v, key, path, out);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let path = join_path(&prefix, &i.to_string());
                crawl_for_key_inner(v, key, path, out);
            }
        }
        _ => {}
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Resolve a dotted path (e.g. `"0.slug"` or `"payload.link.href"`) against `value`, where
/// numeric segments index into arrays and other segments index into objects. Returns `None`
/// if any segment is missing or of the wrong shape.
pub fn get_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}
