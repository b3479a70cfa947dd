//! Flat (context, result) rows the actions operate on.

use crate::expr::{self, ExprError, Scope, Value};
use crate::session::Session;
use benchdb_core::{BenchmarkResult, Bucket, Context};

/// One result together with the context it was measured under.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Context of the result.
    pub context: Context,
    /// The result itself.
    pub result: BenchmarkResult,
}

impl Row {
    /// Pair a context with a result.
    pub fn new(context: Context, result: BenchmarkResult) -> Self {
        Self { context, result }
    }

    /// Every field name visible to expressions.
    pub fn keys() -> impl Iterator<Item = &'static str> {
        Context::FIELDS
            .iter()
            .chain(BenchmarkResult::FIELDS.iter())
            .copied()
    }

    /// Whether `name` is a row field.
    pub fn is_field(name: &str) -> bool {
        Self::keys().any(|k| k == name)
    }

    /// Flatten buckets into rows, keeping bucket then result order.
    pub fn from_buckets(buckets: Vec<Bucket>) -> Vec<Self> {
        buckets
            .into_iter()
            .flat_map(|bucket| {
                let context = bucket.context;
                bucket
                    .results
                    .into_iter()
                    .map(move |result| Row::new(context.clone(), result))
            })
            .collect()
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "commit_time" => Some(Value::Num(self.context.commit_time as f64)),
            "value" => Some(Value::from(self.result.value)),
            "args" => Some(Value::Str(
                self.result
                    .args
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(","),
            )),
            _ => self.text(field).map(Value::from),
        }
    }

    /// Write a field, checking the value type.
    pub fn set(&mut self, field: &str, value: Value) -> expr::Result<()> {
        match (field, value) {
            ("commit_time", Value::Num(n)) => {
                // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
                if n.fract() != 0.0 || n < i64::MIN as f64 || n >= i64::MAX as f64 {
                    return Err(ExprError::Type(format!(
                        "commit_time must be a whole number of seconds in range, got {n}"
                    )));
                }
                self.context.commit_time = n as i64;
                Ok(())
            }
            ("value", Value::Num(n)) if !n.is_finite() => {
                Err(ExprError::Type(format!("value must be finite, got {n}")))
            }
            ("value", Value::Num(n)) => {
                self.result.value = Some(n);
                Ok(())
            }
            ("value", Value::None) => {
                self.result.value = None;
                Ok(())
            }
            ("args", _) => Err(ExprError::Type("args cannot be assigned".to_string())),
            (field, Value::Str(s)) => match self.text_mut(field) {
                Some(slot) => {
                    *slot = s;
                    Ok(())
                }
                None if Self::is_field(field) => {
                    Err(ExprError::Type(format!("cannot assign string to {field}")))
                }
                None => Err(ExprError::UnknownName(field.to_string())),
            },
            (field, other) => Err(ExprError::Type(format!(
                "cannot assign {} to {field}",
                other.type_name()
            ))),
        }
    }

    fn text(&self, field: &str) -> Option<&str> {
        let c = &self.context;
        let s = match field {
            "machine_name" => &c.machine_name,
            "toolkit_version" => &c.toolkit_version,
            "os_type" => &c.os_type,
            "language_version" => &c.language_version,
            "commit_hash" => &c.commit_hash,
            "branch" => &c.branch,
            "accelerator_type" => &c.accelerator_type,
            "cpu_type" => &c.cpu_type,
            "arch" => &c.arch,
            "ram" => &c.ram,
            "name" => &self.result.name,
            _ => return None,
        };
        Some(s)
    }

    fn text_mut(&mut self, field: &str) -> Option<&mut String> {
        let c = &mut self.context;
        let s = match field {
            "machine_name" => &mut c.machine_name,
            "toolkit_version" => &mut c.toolkit_version,
            "os_type" => &mut c.os_type,
            "language_version" => &mut c.language_version,
            "commit_hash" => &mut c.commit_hash,
            "branch" => &mut c.branch,
            "accelerator_type" => &mut c.accelerator_type,
            "cpu_type" => &mut c.cpu_type,
            "arch" => &mut c.arch,
            "ram" => &mut c.ram,
            "name" => &mut self.result.name,
            _ => return None,
        };
        Some(s)
    }
}

/// Resolves row fields first, then session variables.
pub struct RowScope<'a> {
    /// Current row.
    pub row: &'a Row,
    /// Caller's session.
    pub session: &'a Session,
}

impl Scope for RowScope<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.row
            .get(name)
            .or_else(|| self.session.get(name).cloned())
    }

    fn arg(&self, name: &str) -> expr::Result<Value> {
        Ok(self
            .row
            .result
            .arg(name)
            .map_or(Value::None, Value::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(
            Context {
                machine_name: "m".into(),
                commit_time: 100,
                ..Default::default()
            },
            BenchmarkResult::new("bfs", 1.5).with_arg("dataset", "karate"),
        )
    }

    #[test]
    fn test_keys_cover_context_and_result() {
        let keys: Vec<&str> = Row::keys().collect();
        assert_eq!(keys.len(), Context::FIELDS.len() + BenchmarkResult::FIELDS.len());
        assert!(Row::is_field("commit_hash"));
        assert!(Row::is_field("value"));
        assert!(!Row::is_field("threshold"));
    }

    #[test]
    fn test_get_fields() {
        let row = row();
        assert_eq!(row.get("machine_name"), Some(Value::from("m")));
        assert_eq!(row.get("commit_time"), Some(Value::Num(100.0)));
        assert_eq!(row.get("value"), Some(Value::Num(1.5)));
        assert_eq!(row.get("args"), Some(Value::from("dataset=karate")));
        assert_eq!(row.get("threshold"), None);
    }

    #[test]
    fn test_set_checks_types() {
        let mut row = row();
        row.set("commit_hash", Value::from("abc")).unwrap();
        row.set("commit_time", Value::Num(200.0)).unwrap();
        row.set("value", Value::None).unwrap();
        assert_eq!(row.context.commit_hash, "abc");
        assert_eq!(row.context.commit_time, 200);
        assert_eq!(row.result.value, None);

        assert!(row.set("commit_time", Value::from("soon")).is_err());
        assert!(row.set("commit_time", Value::Num(1.5)).is_err());
        assert!(row.set("machine_name", Value::Num(1.0)).is_err());
        assert!(row.set("args", Value::from("x=y")).is_err());
    }

    #[test]
    fn test_set_rejects_unrepresentable_numbers() {
        let mut row = row();
        for n in [1e300, -1e300, f64::INFINITY, f64::NAN, 9_223_372_036_854_775_808.0] {
            assert!(matches!(row.set("commit_time", Value::Num(n)), Err(ExprError::Type(_))));
        }
        assert_eq!(row.context.commit_time, 100);

        for n in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(matches!(row.set("value", Value::Num(n)), Err(ExprError::Type(_))));
        }
        assert_eq!(row.result.value, Some(1.5));
    }

    #[test]
    fn test_scope_prefers_row_fields() {
        let row = row();
        let mut session = Session::new();
        session.set("name", Value::from("shadowed"));
        session.set("limit", Value::Num(2.0));

        let scope = RowScope {
            row: &row,
            session: &session,
        };
        assert_eq!(scope.lookup("name"), Some(Value::from("bfs")));
        assert_eq!(scope.lookup("limit"), Some(Value::Num(2.0)));
        assert_eq!(scope.arg("dataset").unwrap(), Value::from("karate"));
        assert_eq!(scope.arg("missing").unwrap(), Value::None);
    }

    #[test]
    fn test_from_buckets_flattens_in_order() {
        let mut bucket = Bucket::new(Context::default());
        bucket.upsert(BenchmarkResult::new("a", 1.0));
        bucket.upsert(BenchmarkResult::new("b", 2.0));
        let rows = Row::from_buckets(vec![bucket]);
        let names: Vec<&str> = rows.iter().map(|r| r.result.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
