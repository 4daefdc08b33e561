use std::collections::BTreeSet;

use serde_json::{Map, Value};

pub type ConfigTree = Map<String, Value>;

/// Deep structural merge. Objects merge key by key; any other overlay value
/// replaces what was there, arrays included.
pub fn deep_merge(base: &mut ConfigTree, overlay: &ConfigTree) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a ConfigTree>) -> ConfigTree {
    let mut merged = Map::new();
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    merged
}

pub fn get_path<'a, S: AsRef<str>>(tree: &'a ConfigTree, keys: &[S]) -> Option<&'a Value> {
    let (last, parents) = keys.split_last()?;
    let mut current = tree;
    for key in parents {
        current = current.get(key.as_ref())?.as_object()?;
    }
    current.get(last.as_ref())
}

pub fn set_path<S: AsRef<str>>(tree: &mut ConfigTree, keys: &[S], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut current = tree;
    for key in parents {
        let entry = current
            .entry(key.as_ref().to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.as_ref().to_owned(), value);
}

pub fn remove_path<S: AsRef<str>>(tree: &mut ConfigTree, keys: &[S]) -> Option<Value> {
    let (last, parents) = keys.split_last()?;
    let mut current = tree;
    for key in parents {
        current = current.get_mut(key.as_ref())?.as_object_mut()?;
    }
    current.remove(last.as_ref())
}

pub fn for_each_leaf(tree: &ConfigTree, visit: &mut dyn FnMut(&[String], &Value)) {
    fn walk(
        tree: &ConfigTree,
        prefix: &mut Vec<String>,
        visit: &mut dyn FnMut(&[String], &Value),
    ) {
        for (key, value) in tree {
            prefix.push(key.clone());
            match value {
                Value::Object(child) => walk(child, prefix, visit),
                leaf => visit(prefix, leaf),
            }
            prefix.pop();
        }
    }
    walk(tree, &mut Vec::new(), visit);
}

/// Paths (joined with `/`) at which `old` and `new` differ. Additions,
/// removals and edits all count; an array is reported at its own path.
pub fn diff_paths(old: &ConfigTree, new: &ConfigTree) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    diff_objects(old, new, &mut Vec::new(), &mut paths);
    paths
}

fn diff_objects(
    old: &ConfigTree,
    new: &ConfigTree,
    prefix: &mut Vec<String>,
    paths: &mut BTreeSet<String>,
) {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for key in keys {
        prefix.push(key.clone());
        match (old.get(key), new.get(key)) {
            (Some(Value::Object(before)), Some(Value::Object(after))) => {
                diff_objects(before, after, prefix, paths);
            }
            (Some(before), Some(after)) if before == after => {}
            _ => {
                paths.insert(prefix.join("/"));
            }
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tree(value: Value) -> ConfigTree {
        value.as_object().cloned().expect("fixture must be an object")
    }

    #[test]
    fn merge_keeps_non_overlapping_keys_from_every_layer() {
        let low = tree(json!({"db": {"host": "a", "port": 1}, "tags": ["x"]}));
        let high = tree(json!({"db": {"port": 2}, "tags": ["y", "z"], "extra": {"k": true}}));

        let merged = merge_layers([&low, &high]);
        assert_eq!(
            Value::Object(merged),
            json!({"db": {"host": "a", "port": 2}, "tags": ["y", "z"], "extra": {"k": true}})
        );
    }

    #[test]
    fn set_path_creates_intermediate_sections() {
        let mut config = Map::new();
        set_path(&mut config, &["auth", "jwt", "issuer"], json!("ring"));
        set_path(&mut config, &["auth", "ttl"], json!(30));

        assert_eq!(get_path(&config, &["auth", "jwt", "issuer"]), Some(&json!("ring")));
        assert_eq!(remove_path(&mut config, &["auth", "ttl"]), Some(json!(30)));
        assert!(get_path(&config, &["auth", "ttl"]).is_none());
    }

    #[test]
    fn diff_reports_added_removed_and_changed_paths() {
        let old = tree(json!({"db": {"port": 5432, "user": "app"}, "gone": {"x": 1}}));
        let new = tree(json!({"db": {"port": 5433, "user": "app", "pool": 4}}));

        let paths: Vec<String> = diff_paths(&old, &new).into_iter().collect();
        assert_eq!(paths, vec!["db/pool", "db/port", "gone"]);
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let config = tree(json!({"a": {"b": [1, 2], "c": {"d": ""}}}));
        assert!(diff_paths(&config, &config.clone()).is_empty());
    }

    #[test]
    fn leaves_are_visited_with_full_paths() {
        let config = tree(json!({"a": {"b": 1, "c": {"d": "x"}}}));
        let mut seen = Vec::new();
        for_each_leaf(&config, &mut |path, value| {
            seen.push((path.join("."), value.clone()));
        });
        assert_eq!(
            seen,
            vec![("a.b".to_owned(), json!(1)), ("a.c.d".to_owned(), json!("x"))]
        );
    }
}
