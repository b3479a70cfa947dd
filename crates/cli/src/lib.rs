//! CLI for BenchDB.
//!
//! Examines or rewrites a benchmark result store row by row. Every row is one
//! result together with its context; actions run in the order they were given
//! on the command line and each may change the rows seen by the next.

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod actions;
pub mod expr;
pub mod row;
pub mod session;
pub mod summary;

use actions::{Action, ActionKind};
use anyhow::{bail, Context as _};
use benchdb_core::{BenchmarkResult, Configuration, Context};
use benchdb_storage::{BenchDb, StoreOptions};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use row::Row;
use session::Session;
use std::ffi::OsString;
use std::io::Write;
use tracing::info;

const EPILOG: &str = "\
The store is read and every row (one result and its context) has the given
expressions evaluated against it; see --list-keys for the names an expression
can use. Actions run in the order given and each may change the rows seen by
the next.

--exec-once runs once against the session instead of once per row, so it can
set variables used by later actions.

The final rows are written to --write-to, if given. The destination is created
if it does not exist and updated otherwise. Results are keyed by their context,
so changing a context field and writing back to the same store adds results
rather than modifying them.";

/// BenchDB CLI.
#[derive(Parser, Debug)]
#[command(name = "benchdb")]
#[command(author, version, about = "Examine or update a benchmark result store row-by-row")]
#[command(after_help = EPILOG)]
pub struct Cli {
    /// Store to read rows from (path or scheme://bucket/prefix).
    #[arg(long, value_name = "PATH")]
    pub read_from: Option<String>,

    /// List every key usable in an expression and exit.
    #[arg(long)]
    pub list_keys: bool,

    /// List every benchmark name in the store with its argument values.
    #[arg(long)]
    pub list_benchmarks: bool,

    /// Keep only rows for which EXPR is true.
    #[arg(long, value_name = "EXPR")]
    pub filter: Vec<String>,

    /// Run `name = expr; ...` on every row.
    #[arg(long, value_name = "STMTS")]
    pub exec: Vec<String>,

    /// Run `name = expr; ...` once, setting session variables.
    #[arg(long, value_name = "STMTS")]
    pub exec_once: Vec<String>,

    /// Print comma-separated expressions for every row.
    #[arg(long, value_name = "EXPRS")]
    pub print: Vec<String>,

    /// Print a markdown summary of the final rows.
    #[arg(long)]
    pub summary: bool,

    /// Store to write the final rows to; created if missing.
    #[arg(long, value_name = "PATH")]
    pub write_to: Option<String>,
}

/// Parsed command line with actions in the order they were given.
#[derive(Debug)]
pub struct Invocation {
    /// Parsed flags.
    pub cli: Cli,
    /// Action flags and their arguments, in command-line order.
    pub actions: Vec<(ActionKind, String)>,
}

impl Invocation {
    /// Parse the process arguments, exiting on error or `--help`.
    pub fn parse() -> Self {
        match Self::try_parse_from(std::env::args_os()) {
            Ok(invocation) => invocation,
            Err(e) => e.exit(),
        }
    }

    /// Parse `args`, where the first item is the binary name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Cli::command().try_get_matches_from(args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        let actions = ordered_actions(&matches);
        Ok(Self { cli, actions })
    }
}

fn ordered_actions(matches: &ArgMatches) -> Vec<(ActionKind, String)> {
    let mut indexed: Vec<(usize, ActionKind, String)> = Vec::new();
    for (id, kind) in [
        ("filter", ActionKind::Filter),
        ("exec", ActionKind::Exec),
        ("exec_once", ActionKind::ExecOnce),
        ("print", ActionKind::Print),
    ] {
        if let (Some(values), Some(indices)) =
            (matches.get_many::<String>(id), matches.indices_of(id))
        {
            indexed.extend(indices.zip(values).map(|(idx, v)| (idx, kind, v.clone())));
        }
    }
    indexed.sort_by_key(|(idx, _, _)| *idx);
    indexed.into_iter().map(|(_, kind, v)| (kind, v)).collect()
}

/// Run the CLI with the process arguments, writing to stdout.
pub async fn run() -> anyhow::Result<()> {
    let invocation = Invocation::parse();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(invocation, &mut out).await
}

/// Run a parsed invocation, writing row output to `out`.
pub async fn execute<W: Write>(invocation: Invocation, out: &mut W) -> anyhow::Result<()> {
    let Invocation { cli, actions } = invocation;

    if cli.list_keys {
        for key in Row::keys() {
            writeln!(out, "{key}")?;
        }
        return Ok(());
    }

    let Some(read_from) = cli.read_from.as_deref() else {
        bail!("--read-from must be specified");
    };

    // Parse everything before touching any store.
    let actions = actions
        .iter()
        .map(|(kind, source)| {
            if source.trim().is_empty() {
                bail!("{kind} cannot be empty");
            }
            Action::parse(*kind, source).with_context(|| format!("invalid {kind} '{source}'"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let options = StoreOptions::from_env().context("invalid BENCHDB_* setting")?;
    let mut source = BenchDb::open_with_options(read_from, options.clone())
        .with_context(|| format!("cannot open store at {read_from}"))?;
    let config = source
        .load_configuration()
        .await
        .with_context(|| format!("cannot read store at {read_from}"))?;

    if cli.list_benchmarks {
        for (name, benchmark) in source.list_benchmarks().await? {
            let params: Vec<String> = benchmark
                .param_names
                .iter()
                .zip(&benchmark.params)
                .map(|(param, values)| format!("{param}=[{}]", values.join(", ")))
                .collect();
            if params.is_empty() {
                writeln!(out, "{name}")?;
            } else {
                writeln!(out, "{name} {}", params.join(" "))?;
            }
        }
    }

    let mut rows = Row::from_buckets(source.get(None).await?);
    info!(store = %read_from, rows = rows.len(), "Loaded rows");

    let mut session = Session::new();
    for action in &actions {
        rows = action.apply(rows, &mut session, out)?;
    }

    if cli.summary {
        write!(out, "{}", summary::generate_summary(&rows))?;
    }

    if let Some(dest) = cli.write_to.as_deref() {
        write_rows(dest, &config, &rows, options)
            .await
            .with_context(|| format!("cannot write to store at {dest}"))?;
        info!(store = %dest, rows = rows.len(), "Wrote rows");
    }

    Ok(())
}

/// Group rows by context in first-seen order.
pub fn group_rows(rows: &[Row]) -> Vec<(Context, Vec<BenchmarkResult>)> {
    let mut groups: Vec<(Context, Vec<BenchmarkResult>)> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|(c, _)| c == &row.context) {
            Some((_, results)) => results.push(row.result.clone()),
            None => groups.push((row.context.clone(), vec![row.result.clone()])),
        }
    }
    groups
}

async fn write_rows(
    dest: &str,
    config: &Configuration,
    rows: &[Row],
    options: StoreOptions,
) -> anyhow::Result<()> {
    let mut db = BenchDb::open_with_options(dest, options)?.with_branches(config.branches.clone());
    if let Some(repo) = &config.repo {
        db = db.with_repo(repo.clone());
    }
    if let Some(project) = &config.project_name {
        db = db.with_project_name(project.clone());
    }
    if let Some(url) = &config.commit_url {
        db = db.with_commit_url(url.clone());
    }

    db.save_configuration().await?;
    for (context, results) in group_rows(rows) {
        db.add_results(&context, results).await?;
    }
    Ok(())
}
