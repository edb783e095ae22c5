//! Filesystem-safe naming for sink and attachment files
//!
//! # Architecture
//!
//! - [`sanitize_filename`] - Replace path-hostile characters in a display name
//! - [`SlugRegistry`] - Deterministic, collision-free slugs within one base
//! - [`TableTarget`] - Where each sink of one table writes
//!
//! # Usage Example
//!
//! ```rust
//! use airtable_backup::output::{SlugRegistry, SinkFormat, TableTarget};
//! use airtable_backup::{Base, Table};
//! use std::path::PathBuf;
//!
//! let mut slugs = SlugRegistry::new();
//! let slug = slugs.slug_for("Q1/Q2 Plans");
//! assert_eq!(slug, "Q1_Q2 Plans");
//!
//! let target = TableTarget::new(
//!     PathBuf::from("data"),
//!     Base::new("app1", "CRM"),
//!     Table::new("tbl1", "Q1/Q2 Plans"),
//!     slug,
//! );
//! assert_eq!(
//!     target.path_for(SinkFormat::Csv),
//!     PathBuf::from("data/csv/app1_Q1_Q2 Plans.csv")
//! );
//! ```

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::SinkFormat;
use crate::{Base, Table};

/// Replacement for an unsafe name that sanitizes to nothing
pub const UNNAMED: &str = "unnamed";

/// Replacement for an attachment filename that sanitizes to nothing
pub const UNNAMED_ATTACHMENT: &str = "attachment";

const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Make a display name safe for use as a path component.
///
/// `/ \ : * ? " < > |` and control characters become `_`; surrounding
/// whitespace and dots are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        UNNAMED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Stricter sanitization for downloaded attachment names: keeps alphanumerics
/// and ` -_.` only.
pub fn sanitize_attachment_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        UNNAMED_ATTACHMENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Prefix SQLite reserves for its own tables
const SQLITE_RESERVED_PREFIX: &str = "sqlite_";

fn short_hash(name: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    digest[..8].to_string()
}

/// Maps display names to unique slugs within one base.
///
/// Slugs are compared case-insensitively so that two tables never share a
/// file on case-insensitive filesystems.
#[derive(Debug, Default, Clone)]
pub struct SlugRegistry {
    assigned: HashMap<String, String>,
    taken: HashSet<String>,
}

impl SlugRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Slug for `name`; repeated calls with the same name return the same slug
    pub fn slug_for(&mut self, name: &str) -> String {
        if let Some(slug) = self.assigned.get(name) {
            return slug.clone();
        }

        let mut plain = sanitize_filename(name);
        // Slugs double as SQLite table names
        if plain.to_lowercase().starts_with(SQLITE_RESERVED_PREFIX) {
            plain.insert_str(0, "table_");
        }
        let mut slug = plain.clone();
        if self.taken.contains(&slug.to_lowercase()) {
            let hashed = format!("{plain}_{}", short_hash(name));
            slug = hashed.clone();
            let mut counter = 1u32;
            while self.taken.contains(&slug.to_lowercase()) {
                slug = format!("{hashed}_{counter}");
                counter += 1;
            }
        }

        self.taken.insert(slug.to_lowercase());
        self.assigned.insert(name.to_string(), slug.clone());
        slug
    }

    /// Number of distinct names registered
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Whether no name was registered
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

/// Output location of one table across all sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    /// `data/` directory of the session
    pub data_root: PathBuf,
    /// Owning base
    pub base: Base,
    /// Source table
    pub table: Table,
    /// Filesystem slug of the table
    pub slug: String,
}

impl TableTarget {
    /// Create a target
    pub fn new(data_root: PathBuf, base: Base, table: Table, slug: impl Into<String>) -> Self {
        Self {
            data_root,
            base,
            table,
            slug: slug.into(),
        }
    }

    /// File the given sink writes.
    ///
    /// SQLite holds one database per base; every other format writes one
    /// file per table.
    pub fn path_for(&self, format: SinkFormat) -> PathBuf {
        let dir = self.data_root.join(format.dir_name());
        let base_id = sanitize_filename(&self.base.id);
        match format {
            SinkFormat::Sqlite => dir.join(format!("{}.{}", base_id, format.extension())),
            _ => dir.join(format!(
                "{}_{}.{}",
                base_id,
                self.slug,
                format.extension()
            )),
        }
    }

    /// Table name inside the base's SQLite database.
    ///
    /// This is the slug itself, quoted by the sink, so it inherits the
    /// registry's case-insensitive uniqueness.
    pub fn sqlite_table(&self) -> String {
        self.slug.clone()
    }
}
