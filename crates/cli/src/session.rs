//! Variables carried between actions.

use crate::expr::{Scope, Value};
use std::collections::BTreeMap;

/// Named variables owned by one CLI invocation.
///
/// `--exec-once` and `--exec` assignments to names that are not row fields
/// land here and stay visible to every later action.
#[derive(Debug, Clone, Default)]
pub struct Session {
    vars: BTreeMap<String, Value>,
}

impl Session {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variable is set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Scope for Session {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;

    #[test]
    fn test_variables_are_visible_to_expressions() {
        let mut session = Session::new();
        assert!(session.is_empty());
        session.set("threshold", Value::Num(2.0));
        session.set("threshold", Value::Num(3.0));
        assert_eq!(session.len(), 1);

        let value = parse_expr("threshold * 2").unwrap().eval(&session).unwrap();
        assert_eq!(value, Value::Num(6.0));
    }

    #[test]
    fn test_arg_needs_a_row() {
        let session = Session::new();
        assert!(parse_expr("arg('dataset')").unwrap().eval(&session).is_err());
    }
}
