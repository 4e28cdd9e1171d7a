//! Delimited path addressing over nested payload mappings.

use serde_json::Value;

use crate::Map;
use crate::error::PayloadError;
use crate::mappings::Mappings;

/// Delimiter used when a path does not name one.
pub const DEFAULT_DELIMITER: char = '/';

/// Segment prefix that bypasses alias resolution.
pub const NOMAP_PREFIX: char = '!';

/// Marks `name` so path resolution never aliases it.
#[must_use]
pub fn nomap(name: &str) -> String {
    format!("{NOMAP_PREFIX}{name}")
}

/// A delimiter-separated path into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSpec<'a> {
    path: &'a str,
    delimiter: char,
}

impl<'a> PathSpec<'a> {
    /// A path using the default `/` delimiter.
    #[must_use]
    pub const fn new(path: &'a str) -> Self {
        Self {
            path,
            delimiter: DEFAULT_DELIMITER,
        }
    }

    /// A path split on a custom delimiter.
    #[must_use]
    pub const fn with_delimiter(path: &'a str, delimiter: char) -> Self {
        Self { path, delimiter }
    }

    /// The raw path text.
    #[must_use]
    pub const fn as_str(&self) -> &'a str {
        self.path
    }

    /// The delimiter separating segments.
    #[must_use]
    pub const fn delimiter(&self) -> char {
        self.delimiter
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = Segment<'a>> + use<'a> {
        self.path.split(self.delimiter).map(Segment::parse)
    }
}

impl<'a> From<&'a str> for PathSpec<'a> {
    fn from(path: &'a str) -> Self {
        Self::new(path)
    }
}

impl<'a> From<&'a String> for PathSpec<'a> {
    fn from(path: &'a String) -> Self {
        Self::new(path.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Segment<'a> {
    raw: &'a str,
    name: &'a str,
    nomap: bool,
}

impl<'a> Segment<'a> {
    fn parse(raw: &'a str) -> Self {
        match raw.strip_prefix(NOMAP_PREFIX) {
            Some(name) => Self {
                raw,
                name,
                nomap: true,
            },
            None => Self {
                raw,
                name: raw,
                nomap: false,
            },
        }
    }

    /// Key to use at `level`: the literal name when escaped or present,
    /// otherwise its alias.
    fn key<'r>(&self, level: &Map, mappings: &'r Mappings) -> &'r str
    where
        'a: 'r,
    {
        if self.nomap || level.contains_key(self.name) {
            self.name
        } else {
            mappings.resolve(self.name)
        }
    }
}

/// Returns the value at `path`, or `None` when any segment is missing.
pub fn get_path<'v>(item: &'v Map, path: PathSpec<'_>, mappings: &Mappings) -> Option<&'v Value> {
    let mut level = item;
    let mut segments = path.segments().peekable();
    while let Some(segment) = segments.next() {
        let value = level.get(segment.key(level, mappings))?;
        if segments.peek().is_none() {
            return Some(value);
        }
        level = value.as_object()?;
    }
    None
}

/// Mutable variant of [`get_path`].
pub fn get_path_mut<'v>(
    item: &'v mut Map,
    path: PathSpec<'_>,
    mappings: &Mappings,
) -> Option<&'v mut Value> {
    let segments: Vec<Segment<'_>> = path.segments().collect();
    let (last, parents) = segments.split_last()?;
    let mut level = item;
    for segment in parents {
        let key = segment.key(level, mappings).to_owned();
        level = level.get_mut(&key)?.as_object_mut()?;
    }
    let key = last.key(level, mappings).to_owned();
    level.get_mut(&key)
}

/// Reports whether a value exists at `path`.
pub fn path_exists(item: &Map, path: PathSpec<'_>, mappings: &Mappings) -> bool {
    get_path(item, path, mappings).is_some()
}

/// Stores `value` at `path`, creating intermediate mappings.
///
/// # Errors
///
/// Returns [`PayloadError::NotTraversable`] when an intermediate segment holds
/// a non-mapping value.
pub fn set_path(
    item: &mut Map,
    path: PathSpec<'_>,
    value: Value,
    mappings: &Mappings,
) -> Result<(), PayloadError> {
    let (parent, key) = walk_to_parent(item, path, mappings)?;
    parent.insert(key, value);
    Ok(())
}

/// Appends `value` to the list at `path`, creating the list when absent.
///
/// # Errors
///
/// Returns [`PayloadError::NotTraversable`] for a blocked intermediate segment
/// and [`PayloadError::NotAList`] when the leaf exists and is not a list.
pub fn push_path(
    item: &mut Map,
    path: PathSpec<'_>,
    value: Value,
    mappings: &Mappings,
) -> Result<(), PayloadError> {
    let (parent, key) = walk_to_parent(item, path, mappings)?;
    let segment = key.clone();
    match parent
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(list) => {
            list.push(value);
            Ok(())
        }
        _ => Err(PayloadError::NotAList { segment }),
    }
}

/// Removes the value at `path` and prunes parents left empty.
///
/// Returns `false` when nothing was removed.
pub fn delete_path(item: &mut Map, path: PathSpec<'_>, mappings: &Mappings) -> bool {
    let segments: Vec<Segment<'_>> = path.segments().collect();
    delete_segments(item, &segments, mappings)
}

fn delete_segments(item: &mut Map, segments: &[Segment<'_>], mappings: &Mappings) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let key = first.key(item, mappings).to_owned();
    if rest.is_empty() {
        return item.remove(&key).is_some();
    }

    let Some(Value::Object(inner)) = item.get_mut(&key) else {
        return false;
    };
    if !delete_segments(inner, rest, mappings) {
        return false;
    }
    if inner.is_empty() {
        item.remove(&key);
    }
    true
}

/// Deep-merges `from` into `to`.
///
/// Keys missing from `to` are looked up under their alias and inserted under
/// it. Nested mappings merge recursively; lists are extended when `lists` is
/// set. Existing scalars are left untouched.
pub fn merge(from: &Map, to: &mut Map, mappings: &Mappings, lists: bool) {
    for (key, value) in from {
        let name = if to.contains_key(key) {
            key.as_str()
        } else {
            mappings.resolve(key)
        };

        match to.get_mut(name) {
            None => {
                to.insert(name.to_owned(), value.clone());
            }
            Some(existing) => match (value, existing) {
                (Value::Object(source), Value::Object(target)) => {
                    merge(source, target, mappings, lists);
                }
                (Value::Array(source), Value::Array(target)) if lists => {
                    target.extend(source.iter().cloned());
                }
                _ => {}
            },
        }
    }
}

fn walk_to_parent<'v>(
    item: &'v mut Map,
    path: PathSpec<'_>,
    mappings: &Mappings,
) -> Result<(&'v mut Map, String), PayloadError> {
    let segments: Vec<Segment<'_>> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(PayloadError::not_found(path.as_str()));
    };

    let mut level = item;
    for segment in parents {
        let key = segment.key(level, mappings).to_owned();
        let entry = level
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        level = match entry {
            Value::Object(map) => map,
            _ => return Err(PayloadError::not_traversable(segment.raw)),
        };
    }

    let key = last.key(level, mappings).to_owned();
    Ok((level, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn compact() -> Mappings {
        Mappings::compact()
    }

    fn map(value: Value) -> Map {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[rstest]
    fn set_stores_under_aliases(compact: Mappings) {
        let mut item = Map::new();
        set_path(&mut item, PathSpec::new("command/name"), json!("echo"), &compact)
            .expect("set");
        assert_eq!(Value::Object(item), json!({"c": {"n": "echo"}}));
    }

    #[rstest]
    fn literal_keys_win_over_aliases(compact: Mappings) {
        let item = map(json!({"command": {"name": "literal"}, "c": {"n": "aliased"}}));
        let value = get_path(&item, PathSpec::new("command/name"), &compact);
        assert_eq!(value, Some(&json!("literal")));
    }

    #[rstest]
    fn mixed_literal_and_aliased_levels_resolve(compact: Mappings) {
        let item = map(json!({"command": {"n": "mixed"}}));
        let value = get_path(&item, PathSpec::new("command/name"), &compact);
        assert_eq!(value, Some(&json!("mixed")));
    }

    #[rstest]
    fn nomap_segments_skip_aliases(compact: Mappings) {
        let item = map(json!({"a": {"b": 1, "name": 2}}));
        assert_eq!(get_path(&item, PathSpec::new("a/!name"), &compact), Some(&json!(2)));
        assert_eq!(get_path(&item, PathSpec::new("a/!version"), &compact), None);
    }

    #[rstest]
    fn nomap_writes_keep_literal_names(compact: Mappings) {
        let mut item = Map::new();
        let path = format!("data|{}|1.0", nomap("users"));
        set_path(&mut item, PathSpec::with_delimiter(&path, '|'), json!(1), &compact)
            .expect("set");
        assert_eq!(Value::Object(item), json!({"d": {"users": {"1.0": 1}}}));
    }

    #[rstest]
    fn set_refuses_to_descend_into_scalars(compact: Mappings) {
        let mut item = Map::new();
        set_path(&mut item, PathSpec::new("a/b/c"), json!(1), &compact).expect("set");
        let error = set_path(&mut item, PathSpec::new("a/b/c/d"), json!(2), &compact)
            .expect_err("scalar must block traversal");
        assert_eq!(error, PayloadError::not_traversable("c"));
    }

    #[rstest]
    fn push_accumulates_in_order(compact: Mappings) {
        let mut item = Map::new();
        push_path(&mut item, PathSpec::new("errors/svc"), json!(1), &compact).expect("push");
        push_path(&mut item, PathSpec::new("errors/svc"), json!(2), &compact).expect("push");
        assert_eq!(
            get_path(&item, PathSpec::new("errors/svc"), &compact),
            Some(&json!([1, 2]))
        );
    }

    #[rstest]
    fn push_rejects_non_list_leaves(compact: Mappings) {
        let mut item = map(json!({"count": 3}));
        let error = push_path(&mut item, PathSpec::new("count"), json!(1), &compact)
            .expect_err("scalar leaf");
        assert!(matches!(error, PayloadError::NotAList { .. }));
    }

    #[rstest]
    fn delete_prunes_empty_parents(compact: Mappings) {
        let mut item = Map::new();
        set_path(&mut item, PathSpec::new("a/b/c"), json!(1), &compact).expect("set");
        set_path(&mut item, PathSpec::new("x"), json!(true), &compact).expect("set");
        assert!(delete_path(&mut item, PathSpec::new("a/b/c"), &compact));
        assert_eq!(Value::Object(item.clone()), json!({"x": true}));
        assert!(!delete_path(&mut item, PathSpec::new("a/b"), &compact));
    }

    #[rstest]
    fn merge_is_alias_aware(compact: Mappings) {
        let mut target = map(json!({"d": {"users": [1]}, "m": {"i": "abc"}}));
        let source = map(json!({"data": {"users": [2], "posts": [3]}, "meta": {"id": "zzz"}}));
        merge(&source, &mut target, &compact, true);
        assert_eq!(
            Value::Object(target),
            json!({"d": {"users": [1, 2], "posts": [3]}, "m": {"i": "abc"}})
        );
    }

    #[rstest]
    fn merge_without_list_flag_keeps_lists(compact: Mappings) {
        let mut target = map(json!({"l": [1]}));
        let source = map(json!({"links": [2]}));
        merge(&source, &mut target, &compact, false);
        assert_eq!(Value::Object(target), json!({"l": [1]}));
    }

    #[test]
    fn custom_delimiters_split_segments() {
        let item = map(json!({"a/b": {"c": 1}}));
        let value = get_path(
            &item,
            PathSpec::with_delimiter("a/b|c", '|'),
            &Mappings::disabled(),
        );
        assert_eq!(value, Some(&json!(1)));
    }
}
