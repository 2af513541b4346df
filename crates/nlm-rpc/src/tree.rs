//! Generic positional payload tree.
//!
//! The service exchanges field-less arrays whose meaning is encoded purely by
//! position. Both directions use [`Tree`]: callers build parameter trees with
//! the [`tree!`](crate::tree!) macro, and decoded payloads come back as trees
//! that mappers pattern-match explicitly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ShapeError;

/// A decoded (or to-be-encoded) JSON document restricted to the shapes the
/// service uses.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Tree {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Tree>),
    /// Objects are rare in this protocol; they are preserved but never required.
    Map(BTreeMap<String, Tree>),
}

/// Build a [`Tree::Seq`] from heterogeneous items.
///
/// ```
/// use nlm_rpc::{tree, Tree};
///
/// let params = tree!["nb_123", Tree::Null, tree![2], Tree::Null, 0];
/// assert_eq!(params.to_string(), r#"["nb_123",null,[2],null,0]"#);
/// ```
#[macro_export]
macro_rules! tree {
    () => {
        $crate::Tree::Seq(::std::vec::Vec::new())
    };
    ($($item:expr),+ $(,)?) => {
        $crate::Tree::Seq(::std::vec![$($crate::Tree::from($item)),+])
    };
}

impl Tree {
    /// Short name of the variant, used in shape errors and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Tree::Null => "null",
            Tree::Bool(_) => "bool",
            Tree::Int(_) => "int",
            Tree::Float(_) => "float",
            Tree::Str(_) => "string",
            Tree::Seq(_) => "sequence",
            Tree::Map(_) => "map",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Tree::Null)
    }

    /// Element at `index` if this is a sequence long enough to hold it.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Tree> {
        match self {
            Tree::Seq(items) => items.get(index),
            _ => None,
        }
    }

    /// Walk a positional path, e.g. `at(&[0, 1])` is `self[0][1]`.
    #[must_use]
    pub fn at(&self, path: &[usize]) -> Option<&Tree> {
        path.iter().try_fold(self, |node, &index| node.get(index))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tree::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Tree::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Tree::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_seq(&self) -> Option<&[Tree]> {
        match self {
            Tree::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Number of positions; zero for anything that is not a sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_seq().map_or(0, <[Tree]>::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follow first elements down until a string is found.
    ///
    /// Registration responses nest the new ID at varying depths
    /// (`[[[["id"]]]]`, `[["id"]]`, ...).
    #[must_use]
    pub fn first_string(&self) -> Option<&str> {
        match self {
            Tree::Str(s) => Some(s),
            Tree::Seq(items) => items.first().and_then(Tree::first_string),
            _ => None,
        }
    }

    /// Require a sequence with at least `min` positions.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] when the tree is not a sequence or is shorter
    /// than `min`.
    pub fn expect_len(&self, min: usize, what: &'static str) -> Result<&[Tree], ShapeError> {
        let Tree::Seq(items) = self else {
            return Err(ShapeError::NotASequence {
                what,
                found: self.kind(),
            });
        };
        if items.len() < min {
            return Err(ShapeError::TooShort {
                what,
                expected: min,
                actual: items.len(),
            });
        }
        Ok(items)
    }
}

impl From<Value> for Tree {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Tree::Null,
            Value::Bool(b) => Tree::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Tree::Int(i),
                None => n.as_f64().map_or(Tree::Null, Tree::Float),
            },
            Value::String(s) => Tree::Str(s),
            Value::Array(items) => Tree::Seq(items.into_iter().map(Tree::from).collect()),
            Value::Object(map) => Tree::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Tree::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&Tree> for Value {
    fn from(tree: &Tree) -> Self {
        match tree {
            Tree::Null => Value::Null,
            Tree::Bool(b) => Value::Bool(*b),
            Tree::Int(i) => Value::from(*i),
            Tree::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Tree::Str(s) => Value::String(s.clone()),
            Tree::Seq(items) => Value::Array(items.iter().map(Value::from).collect()),
            Tree::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Tree {
    fn from(s: &str) -> Self {
        Tree::Str(s.to_string())
    }
}

impl From<String> for Tree {
    fn from(s: String) -> Self {
        Tree::Str(s)
    }
}

impl From<&String> for Tree {
    fn from(s: &String) -> Self {
        Tree::Str(s.clone())
    }
}

impl From<bool> for Tree {
    fn from(b: bool) -> Self {
        Tree::Bool(b)
    }
}

impl From<i64> for Tree {
    fn from(n: i64) -> Self {
        Tree::Int(n)
    }
}

impl From<i32> for Tree {
    fn from(n: i32) -> Self {
        Tree::Int(i64::from(n))
    }
}

impl From<u32> for Tree {
    fn from(n: u32) -> Self {
        Tree::Int(i64::from(n))
    }
}

impl From<f64> for Tree {
    fn from(f: f64) -> Self {
        Tree::Float(f)
    }
}

impl<T: Into<Tree>> From<Option<T>> for Tree {
    fn from(value: Option<T>) -> Self {
        value.map_or(Tree::Null, Into::into)
    }
}

impl<T: Into<Tree>> From<Vec<T>> for Tree {
    fn from(items: Vec<T>) -> Self {
        Tree::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Tree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Tree::from)
    }
}

/// Compact JSON, identical to what goes on the wire.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tree_macro_builds_heterogeneous_sequence() {
        let tree = tree!["nb", Tree::Null, tree![2], true, 0];
        assert_eq!(tree.to_string(), r#"["nb",null,[2],true,0]"#);
    }

    #[test]
    fn test_empty_tree_macro() {
        assert_eq!(tree![], Tree::Seq(Vec::new()));
        assert_eq!(tree![].to_string(), "[]");
    }

    #[test]
    fn test_from_value_preserves_shape() {
        let tree = Tree::from(json!([["nb1", "Title"], null, 3, 1.5, false]));
        assert_eq!(tree.at(&[0, 0]).and_then(Tree::as_str), Some("nb1"));
        assert!(tree.get(1).is_some_and(Tree::is_null));
        assert_eq!(tree.get(2).and_then(Tree::as_i64), Some(3));
        assert_eq!(tree.get(3), Some(&Tree::Float(1.5)));
        assert_eq!(tree.get(4).and_then(Tree::as_bool), Some(false));
    }

    #[test]
    fn test_objects_are_tolerated() {
        let tree = Tree::from(json!({"a": [1]}));
        assert_eq!(tree.kind(), "map");
        assert_eq!(Value::from(&tree), json!({"a": [1]}));
    }

    #[test]
    fn test_get_past_end_is_none() {
        let tree = tree!["only"];
        assert!(tree.get(1).is_none());
        assert!(tree.at(&[0, 0]).is_none());
        assert!(Tree::Str("x".into()).get(0).is_none());
    }

    #[test]
    fn test_first_string_varied_nesting() {
        for raw in [
            json!([[[["src_1"]]]]),
            json!([[["src_1"]]]),
            json!([["src_1"]]),
            json!("src_1"),
        ] {
            assert_eq!(Tree::from(raw).first_string(), Some("src_1"));
        }
        assert_eq!(Tree::from(json!([[null, "x"]])).first_string(), None);
        assert_eq!(tree![].first_string(), None);
    }

    #[test]
    fn test_expect_len_guards() {
        let tree = tree!["a", "b"];
        assert_eq!(tree.expect_len(2, "pair").map(<[Tree]>::len), Ok(2));

        let err = tree.expect_len(3, "triple").unwrap_err();
        assert_eq!(
            err,
            ShapeError::TooShort {
                what: "triple",
                expected: 3,
                actual: 2
            }
        );

        let err = Tree::Int(1).expect_len(0, "seq").unwrap_err();
        assert!(matches!(
            err,
            ShapeError::NotASequence { found: "int", .. }
        ));
    }

    #[test]
    fn test_option_and_vec_conversions() {
        let none: Option<&str> = None;
        assert_eq!(Tree::from(none), Tree::Null);
        assert_eq!(Tree::from(Some("x")), Tree::Str("x".into()));
        assert_eq!(Tree::from(vec![1, 2]).to_string(), "[1,2]");
    }

    #[test]
    fn test_serde_round_trip() {
        let tree = tree!["a", tree![1, Tree::Null], false];
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_len_of_scalar_is_zero() {
        assert_eq!(Tree::Str("abc".into()).len(), 0);
        assert!(Tree::Null.is_empty());
        assert_eq!(tree![1, 2, 3].len(), 3);
    }
}
