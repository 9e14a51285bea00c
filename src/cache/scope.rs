//! Scopes select which stored records make up a result set.

use std::cmp::Ordering;

use serde_json::Value;

use super::record_store::{Change, ChangeSet};

/// Filter over a record's JSON data.
///
/// Field names are dotted paths into the data (`"term.name"`); the special
/// field `"id"` resolves to the record's data `id` like any other field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  All,
  Eq(String, Value),
  In(String, Vec<Value>),
  /// Field is present and not null
  Exists(String),
  Not(Box<Predicate>),
  And(Vec<Predicate>),
  Or(Vec<Predicate>),
}

impl Predicate {
  pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
    Predicate::Eq(field.into(), value.into())
  }

  pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
    Predicate::In(field.into(), values.into_iter().map(Into::into).collect())
  }

  pub fn matches(&self, data: &Value) -> bool {
    match self {
      Predicate::All => true,
      Predicate::Eq(field, expected) => lookup(data, field).is_some_and(|v| loose_eq(v, expected)),
      Predicate::In(field, values) => {
        lookup(data, field).is_some_and(|v| values.iter().any(|candidate| loose_eq(v, candidate)))
      }
      Predicate::Exists(field) => lookup(data, field).is_some_and(|v| !v.is_null()),
      Predicate::Not(inner) => !inner.matches(data),
      Predicate::And(all) => all.iter().all(|p| p.matches(data)),
      Predicate::Or(any) => any.iter().any(|p| p.matches(data)),
    }
  }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
  pub field: String,
  pub ascending: bool,
}

/// Predicate plus ordering: which records form a result set and in what order.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
  pub predicate: Predicate,
  pub order: Vec<SortKey>,
}

impl Default for Scope {
  fn default() -> Self {
    Self::all()
  }
}

impl Scope {
  /// Every record of the entity type, ordered by id.
  pub fn all() -> Self {
    Self {
      predicate: Predicate::All,
      order: vec![SortKey {
        field: "id".to_string(),
        ascending: true,
      }],
    }
  }

  /// Records whose `field` equals `value`, ordered by id.
  pub fn where_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
    Self {
      predicate: Predicate::eq(field, value),
      ..Self::all()
    }
  }

  pub fn with_predicate(predicate: Predicate) -> Self {
    Self {
      predicate,
      ..Self::all()
    }
  }

  /// Replace the ordering with a single key.
  pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
    self.order = vec![SortKey {
      field: field.into(),
      ascending,
    }];
    self
  }

  /// Append a tie-breaking sort key.
  pub fn then_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
    self.order.push(SortKey {
      field: field.into(),
      ascending,
    });
    self
  }

  pub fn matches(&self, data: &Value) -> bool {
    self.predicate.matches(data)
  }

  /// Compare two records' data by this scope's ordering.
  pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
    for key in &self.order {
      let ord = compare_values(lookup(a, &key.field), lookup(b, &key.field));
      let ord = if key.ascending { ord } else { ord.reverse() };
      if ord != Ordering::Equal {
        return ord;
      }
    }
    Ordering::Equal
  }

  /// Whether a single change could alter the result set of this scope.
  ///
  /// A change intersects when either its before or after image matches, so
  /// records leaving the scope are noticed as well as records entering it.
  pub fn intersects_change(&self, entity_type: &str, change: &Change) -> bool {
    change.entity_type == entity_type
      && (change.before.as_ref().is_some_and(|d| self.matches(d))
        || change.after.as_ref().is_some_and(|d| self.matches(d)))
  }

  pub fn intersects(&self, entity_type: &str, changes: &ChangeSet) -> bool {
    changes
      .changes
      .iter()
      .any(|change| self.intersects_change(entity_type, change))
  }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .try_fold(data, |current, segment| current.get(segment))
}

/// Numbers and numeric strings compare equal when they denote the same id,
/// since remote ids arrive as either.
fn loose_eq(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
      n.to_string() == *s
    }
    _ => a == b,
  }
}

fn type_rank(value: Option<&Value>) -> u8 {
  match value {
    None | Some(Value::Null) => 0,
    Some(Value::Bool(_)) => 1,
    Some(Value::Number(_)) => 2,
    Some(Value::String(_)) => 3,
    Some(Value::Array(_)) => 4,
    Some(Value::Object(_)) => 5,
  }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
    (Some(Value::Number(x)), Some(Value::Number(y))) => {
      let x = x.as_f64().unwrap_or(f64::NAN);
      let y = y.as_f64().unwrap_or(f64::NAN);
      x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
    (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
    _ => type_rank(a).cmp(&type_rank(b)),
  }
}
