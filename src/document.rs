// Typed view over loosely-shaped catalog documents
use serde_json::Value;
use std::collections::BTreeMap;

/// A leaf value of a catalog document.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Catalog document node: a keyed document, a list, or a scalar.
///
/// Every accessor returns `Option` so shape mismatches surface as a missing
/// value instead of a panic.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Document(BTreeMap<String, Node>),
    List(Vec<Node>),
    Scalar(Scalar),
}

impl Node {
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Document(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Node::Scalar(Scalar::Int(n)) => i32::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Node::Document(_))
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Node::as_i32)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Node::as_str)
    }

    pub fn get_list(&self, key: &str) -> Option<&[Node]> {
        self.get(key).and_then(Node::as_list)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Node::Scalar(Scalar::Int(i)),
                None => Node::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => Node::Scalar(Scalar::Text(s)),
            Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            Value::Object(fields) => Node::Document(
                fields.into_iter().map(|(k, v)| (k, Node::from(v))).collect(),
            ),
        }
    }
}

impl From<&Node> for Value {
    fn from(node: &Node) -> Self {
        match node {
            Node::Scalar(Scalar::Null) => Value::Null,
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Node::Scalar(Scalar::Int(i)) => Value::from(*i),
            Node::Scalar(Scalar::Float(f)) => {
                serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
            }
            Node::Scalar(Scalar::Text(s)) => Value::String(s.clone()),
            Node::List(items) => Value::Array(items.iter().map(Value::from).collect()),
            Node::Document(fields) => Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect(),
            ),
        }
    }
}
