// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! What a repository backs up, frozen when the repository is created

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Table,
    Database,
    Catalog,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Table => "TABLE",
            Self::Database => "DATABASE",
            Self::Catalog => "CATALOG",
        })
    }
}

/// A table name within a catalog
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    pub namespace: String,
    pub name: String,
}

impl TableIdent {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace.table`; the last dot separates the table name
    #[must_use]
    pub fn parse(qualified: &str) -> Option<Self> {
        let (namespace, name) = qualified.rsplit_once('.')?;
        (!namespace.is_empty() && !name.is_empty()).then(|| Self::new(namespace, name))
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Granularity plus the `(catalog, namespace, table)` tuple it pins down.
///
/// Two scopes are compatible only when they are equal: a table-level
/// repository never accepts a different table, and a database-level
/// repository never accepts a single-table backup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub granularity: Granularity,
    pub catalog: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl Scope {
    pub fn table(catalog: impl Into<String>, ident: &TableIdent) -> Self {
        Self {
            granularity: Granularity::Table,
            catalog: catalog.into(),
            namespace: Some(ident.namespace.clone()),
            table: Some(ident.name.clone()),
        }
    }

    pub fn database(catalog: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            granularity: Granularity::Database,
            catalog: catalog.into(),
            namespace: Some(namespace.into()),
            table: None,
        }
    }

    pub fn catalog(catalog: impl Into<String>) -> Self {
        Self {
            granularity: Granularity::Catalog,
            catalog: catalog.into(),
            namespace: None,
            table: None,
        }
    }

    #[must_use]
    pub fn is_compatible(&self, other: &Scope) -> bool {
        self == other
    }

    /// Whether a table falls inside this scope
    #[must_use]
    pub fn contains(&self, ident: &TableIdent) -> bool {
        let namespace_ok = self
            .namespace
            .as_ref()
            .is_none_or(|ns| *ns == ident.namespace);
        let table_ok = self.table.as_ref().is_none_or(|t| *t == ident.name);
        namespace_ok && table_ok
    }

    /// The single table of a table-level scope
    #[must_use]
    pub fn table_ident(&self) -> Option<TableIdent> {
        match (&self.namespace, &self.table) {
            (Some(ns), Some(t)) => Some(TableIdent::new(ns, t)),
            _ => None,
        }
    }

    /// Prefix that keeps file keys of different tables apart
    #[must_use]
    pub fn key_prefix(&self, ident: &TableIdent) -> String {
        match self.granularity {
            Granularity::Table => String::new(),
            Granularity::Database => format!("{}/", ident.name),
            Granularity::Catalog => format!("{}/{}/", ident.namespace, ident.name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.granularity, self.catalog)?;
        if let Some(ns) = &self.namespace {
            write!(f, "/{ns}")?;
        }
        if let Some(t) = &self.table {
            write!(f, "/{t}")?;
        }
        Ok(())
    }
}
