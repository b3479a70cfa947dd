//! The row actions, applied in command-line order.

use crate::expr::{parse_expr, parse_expr_list, parse_program, Expr, ExprError, Statement};
use crate::row::{Row, RowScope};
use crate::session::Session;
use anyhow::Context as _;
use std::fmt;
use std::io::Write;

/// Which flag an action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// `--filter EXPR`
    Filter,
    /// `--exec STMTS`
    Exec,
    /// `--exec-once STMTS`
    ExecOnce,
    /// `--print EXPRS`
    Print,
}

impl ActionKind {
    /// The command-line flag for this kind.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Filter => "--filter",
            Self::Exec => "--exec",
            Self::ExecOnce => "--exec-once",
            Self::Print => "--print",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// A parsed action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Keep rows for which the expression is truthy.
    Filter(Expr),
    /// Run assignments on every row.
    Exec(Vec<Statement>),
    /// Run assignments once against the session.
    ExecOnce(Vec<Statement>),
    /// Print the expressions for every row, space-separated.
    Print(Vec<Expr>),
}

impl Action {
    /// Parse the argument of a flag.
    pub fn parse(kind: ActionKind, source: &str) -> Result<Self, ExprError> {
        Ok(match kind {
            ActionKind::Filter => Self::Filter(parse_expr(source)?),
            ActionKind::Exec => Self::Exec(parse_program(source)?),
            ActionKind::ExecOnce => Self::ExecOnce(parse_program(source)?),
            ActionKind::Print => Self::Print(parse_expr_list(source)?),
        })
    }

    /// The flag this action came from.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Filter(_) => ActionKind::Filter,
            Self::Exec(_) => ActionKind::Exec,
            Self::ExecOnce(_) => ActionKind::ExecOnce,
            Self::Print(_) => ActionKind::Print,
        }
    }

    /// Apply the action to `rows`, returning the rows for the next action.
    pub fn apply<W: Write>(
        &self,
        mut rows: Vec<Row>,
        session: &mut Session,
        out: &mut W,
    ) -> anyhow::Result<Vec<Row>> {
        match self {
            Self::Filter(expr) => {
                let mut kept = Vec::with_capacity(rows.len());
                for (i, row) in rows.into_iter().enumerate() {
                    let keep = expr
                        .eval(&RowScope {
                            row: &row,
                            session: &*session,
                        })
                        .with_context(|| format!("--filter failed on row {i}"))?
                        .is_truthy();
                    if keep {
                        kept.push(row);
                    }
                }
                Ok(kept)
            }
            Self::Exec(statements) => {
                for (i, row) in rows.iter_mut().enumerate() {
                    for statement in statements {
                        exec_on_row(statement, row, session)
                            .with_context(|| format!("--exec failed on row {i}"))?;
                    }
                }
                Ok(rows)
            }
            Self::ExecOnce(statements) => {
                for statement in statements {
                    if Row::is_field(&statement.target) {
                        anyhow::bail!(
                            "--exec-once cannot assign row field '{}'",
                            statement.target
                        );
                    }
                    let value = statement
                        .expr
                        .eval(&*session)
                        .context("--exec-once failed")?;
                    session.set(statement.target.clone(), value);
                }
                Ok(rows)
            }
            Self::Print(exprs) => {
                for (i, row) in rows.iter().enumerate() {
                    let scope = RowScope {
                        row,
                        session: &*session,
                    };
                    let values = exprs
                        .iter()
                        .map(|e| e.eval(&scope).map(|v| v.to_string()))
                        .collect::<Result<Vec<_>, _>>()
                        .with_context(|| format!("--print failed on row {i}"))?;
                    writeln!(out, "{}", values.join(" "))?;
                }
                Ok(rows)
            }
        }
    }
}

fn exec_on_row(statement: &Statement, row: &mut Row, session: &mut Session) -> Result<(), ExprError> {
    let value = statement.expr.eval(&RowScope {
        row: &*row,
        session: &*session,
    })?;
    if Row::is_field(&statement.target) {
        row.set(&statement.target, value)
    } else {
        session.set(statement.target.clone(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Value;
    use benchdb_core::{BenchmarkResult, Context};

    fn rows() -> Vec<Row> {
        let ctx = Context {
            machine_name: "m".into(),
            commit_hash: "aaaa".into(),
            ..Default::default()
        };
        ["bfs", "pagerank", "sssp"]
            .iter()
            .enumerate()
            .map(|(i, name)| Row::new(ctx.clone(), BenchmarkResult::new(*name, i as f64)))
            .collect()
    }

    fn apply(kind: ActionKind, source: &str, rows: Vec<Row>, session: &mut Session) -> (Vec<Row>, String) {
        let mut out = Vec::<u8>::new();
        let rows = Action::parse(kind, source)
            .unwrap()
            .apply(rows, session, &mut out)
            .unwrap();
        (rows, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_filter_keeps_matching_rows() {
        let mut session = Session::new();
        let (rows, _) = apply(ActionKind::Filter, "value >= 1", rows(), &mut session);
        let names: Vec<&str> = rows.iter().map(|r| r.result.name.as_str()).collect();
        assert_eq!(names, ["pagerank", "sssp"]);
    }

    #[test]
    fn test_print_writes_one_line_per_row() {
        let mut session = Session::new();
        let (rows, out) = apply(ActionKind::Print, "name, value", rows(), &mut session);
        assert_eq!(rows.len(), 3);
        assert_eq!(out, "bfs 0\npagerank 1\nsssp 2\n");
    }

    #[test]
    fn test_exec_updates_rows_and_session() {
        let mut session = Session::new();
        let (rows, _) = apply(
            ActionKind::Exec,
            "commit_hash = 'bbbb'; seen = name",
            rows(),
            &mut session,
        );
        assert!(rows.iter().all(|r| r.context.commit_hash == "bbbb"));
        assert_eq!(session.get("seen"), Some(&Value::from("sssp")));
    }

    #[test]
    fn test_exec_once_feeds_later_filter() {
        let mut session = Session::new();
        let (rows, _) = apply(ActionKind::ExecOnce, "limit = 2", rows(), &mut session);
        let (rows, _) = apply(ActionKind::Filter, "value < limit", rows, &mut session);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_exec_once_rejects_row_fields() {
        let mut session = Session::new();
        let err = Action::parse(ActionKind::ExecOnce, "name = 'x'")
            .unwrap()
            .apply(rows(), &mut session, &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(err.to_string().contains("row field"));
    }

    #[test]
    fn test_exec_rejects_non_finite_value() {
        let mut session = Session::new();
        let err = Action::parse(ActionKind::Exec, "value = num('inf')")
            .unwrap()
            .apply(rows(), &mut session, &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(err.to_string().contains("--exec failed on row 0"));
    }

    #[test]
    fn test_evaluation_error_names_the_row() {
        let mut session = Session::new();
        let err = Action::parse(ActionKind::Filter, "value > 'x'")
            .unwrap()
            .apply(rows(), &mut session, &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(err.to_string().contains("row 0"));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [ActionKind::Filter, ActionKind::Exec, ActionKind::ExecOnce, ActionKind::Print] {
            let source = match kind {
                ActionKind::Exec | ActionKind::ExecOnce => "x = 1",
                _ => "1",
            };
            assert_eq!(Action::parse(kind, source).unwrap().kind(), kind);
        }
        assert_eq!(ActionKind::ExecOnce.to_string(), "--exec-once");
    }
}
