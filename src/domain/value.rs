//! Generic traversal of structured definitions
//!
//! Definitions are arbitrary `serde_json::Value` trees. Every consumer
//! (reference extraction, rewriting, pending patches) goes through the two
//! walkers here, which visit string leaves together with the key that owns
//! them and their JSON pointer.

use serde_json::{Map, Value};

/// Position of a string leaf inside a definition
#[derive(Debug, Clone, Copy)]
pub struct Leaf<'a> {
    /// Nearest enclosing object key; array elements inherit the array's key
    pub key: Option<&'a str>,

    /// JSON pointer (RFC 6901) of the leaf
    pub pointer: &'a str,
}

/// Escapes one reference token of a JSON pointer
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Calls `f` for every string leaf in `value`
pub fn for_each_string<F>(value: &Value, f: &mut F)
where
    F: FnMut(&Leaf<'_>, &str),
{
    let mut pointer = String::new();
    walk(value, None, &mut pointer, f);
}

fn walk<F>(value: &Value, key: Option<&str>, pointer: &mut String, f: &mut F)
where
    F: FnMut(&Leaf<'_>, &str),
{
    match value {
        Value::String(s) => f(&Leaf { key, pointer }, s),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&i.to_string());
                walk(item, key, pointer, f);
                pointer.truncate(len);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_token(k));
                walk(v, Some(k), pointer, f);
                pointer.truncate(len);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Returns a copy of `value` with string leaves replaced where `f` says so
///
/// `f` returns `Some(new)` to replace a leaf and `None` to keep it. The
/// shape of the tree (key order included) is preserved.
pub fn map_strings<F>(value: &Value, f: &mut F) -> Value
where
    F: FnMut(&Leaf<'_>, &str) -> Option<String>,
{
    let mut pointer = String::new();
    map_walk(value, None, &mut pointer, f)
}

fn map_walk<F>(value: &Value, key: Option<&str>, pointer: &mut String, f: &mut F) -> Value
where
    F: FnMut(&Leaf<'_>, &str) -> Option<String>,
{
    match value {
        Value::String(s) => match f(&Leaf { key, pointer }, s) {
            Some(replaced) => Value::String(replaced),
            None => value.clone(),
        },
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&i.to_string());
                out.push(map_walk(item, key, pointer, f));
                pointer.truncate(len);
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_token(k));
                out.insert(k.clone(), map_walk(v, Some(k), pointer, f));
                pointer.truncate(len);
            }
            Value::Object(out)
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn visits_leaves_with_keys_and_pointers() {
        let value = json!({
            "a": "x",
            "list": ["y", {"b": "z"}],
            "n": 3
        });

        let mut seen = Vec::new();
        for_each_string(&value, &mut |leaf, s| {
            seen.push((leaf.key.map(str::to_string), leaf.pointer.to_string(), s.to_string()));
        });

        assert_eq!(
            seen,
            vec![
                (Some("a".into()), "/a".into(), "x".into()),
                (Some("list".into()), "/list/0".into(), "y".into()),
                (Some("b".into()), "/list/1/b".into(), "z".into()),
            ]
        );
    }

    #[test]
    fn pointers_are_escaped() {
        let value = json!({"a/b": {"c~d": "v"}});
        let mut pointers = Vec::new();
        for_each_string(&value, &mut |leaf, _| pointers.push(leaf.pointer.to_string()));

        assert_eq!(pointers, vec!["/a~1b/c~0d"]);
        assert_eq!(value.pointer(&pointers[0]), Some(&json!("v")));
    }

    #[test]
    fn map_replaces_selected_leaves() {
        let value = json!({"keep": "same", "swap": "old", "nested": [{"swap": "old"}]});
        let mapped = map_strings(&value, &mut |leaf, s| {
            (leaf.key == Some("swap") && s == "old").then(|| "new".to_string())
        });

        assert_eq!(mapped, json!({"keep": "same", "swap": "new", "nested": [{"swap": "new"}]}));
    }

    #[test]
    fn map_preserves_key_order() {
        let value = json!({"z": "1", "a": "2", "m": "3"});
        let mapped = map_strings(&value, &mut |_, _| None);
        let keys: Vec<_> = mapped.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn scalars_pass_through() {
        let value = json!([null, true, 1.5]);
        assert_eq!(map_strings(&value, &mut |_, _| Some("x".into())), value);
    }
}
