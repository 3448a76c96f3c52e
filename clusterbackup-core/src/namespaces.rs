/*!
Namespace set resolution for a single backup run.
*/

use std::collections::BTreeSet;

use crate::cluster::{object_name, Lister, ResourceCoordinate};
use crate::{BackupError, CancelToken, Result};

/// Computes the namespaces a run operates over, at most once.
///
/// Resolution is deferred until the first namespaced resource type is
/// captured and the answer is cached for the rest of the run.
#[derive(Debug)]
pub struct NamespaceResolver {
    include: Vec<String>,
    exclude: BTreeSet<String>,
    resolved: Option<Vec<String>>,
}

impl NamespaceResolver {
    /// Create a resolver from raw filters. Entries are trimmed and blank
    /// entries dropped.
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let include = normalize(include)
            .into_iter()
            .filter(|ns| seen.insert(ns.clone()))
            .collect();
        Self {
            include,
            exclude: normalize(exclude).into_iter().collect(),
            resolved: None,
        }
    }

    /// Namespaces to operate over.
    ///
    /// A non-empty include list is returned as given, without checking that
    /// the namespaces exist. Otherwise every namespace on the server is
    /// listed and the excluded ones removed.
    pub fn resolve<L: Lister + ?Sized>(&mut self, lister: &L, cancel: &CancelToken) -> Result<&[String]> {
        if self.resolved.is_none() {
            let namespaces = self.compute(lister, cancel)?;
            self.resolved = Some(namespaces);
        }
        Ok(self.resolved.as_deref().unwrap_or_default())
    }

    fn compute<L: Lister + ?Sized>(&self, lister: &L, cancel: &CancelToken) -> Result<Vec<String>> {
        if !self.include.is_empty() {
            return Ok(self.include.clone());
        }

        let objects = lister
            .list(&ResourceCoordinate::namespaces(), None, cancel)
            .map_err(|e| {
                if e.is_cancelled() {
                    BackupError::Cancelled
                } else {
                    BackupError::NamespaceListing(e)
                }
            })?;

        Ok(objects
            .iter()
            .filter_map(object_name)
            .filter(|name| !self.exclude.contains(*name))
            .map(str::to_string)
            .collect())
    }
}

fn normalize<I>(values: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    values
        .into_iter()
        .map(|value| value.as_ref().trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
