// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Store configuration and its reconciliation rules.
//!
//! Configuration is additive: the first writer establishes the repository,
//! project name and commit URL; later writers can only append branches.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Suffix every stored repository identifier ends with.
pub const VCS_SUFFIX: &str = ".git";

/// Repository identity and branch list of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Repository identifier (normalized to end in [`VCS_SUFFIX`] when stored).
    pub repo: Option<String>,
    /// Ordered, duplicate-free branch names.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Optional project name.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Optional commit URL template.
    #[serde(default)]
    pub commit_url: Option<String>,
}

impl Configuration {
    /// Create a configuration for a repository and initial branches.
    pub fn new<I, S>(repo: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repo: Some(repo.into()),
            branches: branches.into_iter().map(Into::into).collect(),
            project_name: None,
            commit_url: None,
        }
    }

    /// Fold `incoming` into `existing`.
    ///
    /// The repository, project name and commit URL are taken from `existing`
    /// when present, otherwise from `incoming`. Branches keep `existing` order
    /// and gain any new `incoming` branches in the order offered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if neither side names a repository.
    pub fn reconcile(existing: Option<&Configuration>, incoming: &Configuration) -> Result<Self> {
        let repo = existing
            .and_then(|c| c.repo.as_deref())
            .or(incoming.repo.as_deref())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                Error::configuration("repository identifier must be set before writing configuration")
            })?;

        let mut branches: Vec<String> = Vec::new();
        let offered = existing
            .map(|c| c.branches.iter())
            .into_iter()
            .flatten()
            .chain(incoming.branches.iter());
        for branch in offered {
            if !branches.contains(branch) {
                branches.push(branch.clone());
            }
        }

        Ok(Self {
            repo: Some(normalize_repo(repo)),
            branches,
            project_name: existing
                .and_then(|c| c.project_name.clone())
                .or_else(|| incoming.project_name.clone()),
            commit_url: existing
                .and_then(|c| c.commit_url.clone())
                .or_else(|| incoming.commit_url.clone()),
        })
    }
}

/// Append [`VCS_SUFFIX`] to a repository identifier that lacks it.
pub fn normalize_repo(repo: &str) -> String {
    if repo.ends_with(VCS_SUFFIX) {
        repo.to_string()
    } else {
        format!("{repo}{VCS_SUFFIX}")
    }
}
