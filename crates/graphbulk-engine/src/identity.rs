//! Relationship identity.
//!
//! Incoming relationships may arrive without an id. Their id is derived from
//! `{source}-{name}-{target}`, extended with a digest of the configured
//! distinguishing properties when any are present, so that importing the
//! same relationship twice targets the same stored edge. Relationships
//! written under older schemes carry random ids; when an equivalent legacy
//! relationship already exists its id is reused instead of creating a
//! duplicate edge.

use graphbulk_store::{GraphReader, Relationship};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hex characters of the property digest kept in a canonical id.
const DIGEST_LEN: usize = 16;

/// Where a resolved id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// The relationship carried its own id.
    Explicit,
    /// Derived from endpoints, name and distinguishing properties.
    Canonical,
    /// Reused from an equivalent stored relationship.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: String,
    pub source: IdSource,
}

/// Values of the distinguishing properties the relationship carries, by name.
fn distinguishing_values<'a>(
    rel: &'a Relationship,
    distinguishing: &'a [String],
) -> BTreeMap<&'a str, &'a Value> {
    distinguishing
        .iter()
        .filter_map(|name| {
            rel.properties
                .get(name)
                .filter(|v| !v.is_null())
                .map(|v| (name.as_str(), v))
        })
        .collect()
}

/// Deterministic id for `rel`.
pub fn canonical_id(rel: &Relationship, distinguishing: &[String]) -> String {
    let base = format!("{}-{}-{}", rel.source_id, rel.name, rel.target_id);
    let values = distinguishing_values(rel, distinguishing);
    if values.is_empty() {
        return base;
    }

    // BTreeMap keys serialize sorted, so the digest ignores declaration order.
    let encoded = serde_json::to_vec(&values).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let hex: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(DIGEST_LEN)
        .collect();
    format!("{base}-{hex}")
}

/// Same endpoints, same name, same distinguishing property values.
pub fn is_equivalent(a: &Relationship, b: &Relationship, distinguishing: &[String]) -> bool {
    a.source_id == b.source_id
        && a.target_id == b.target_id
        && a.name == b.name
        && distinguishing_values(a, distinguishing) == distinguishing_values(b, distinguishing)
}

/// Whether `stored` is the edge `incoming` describes: same id when the
/// incoming relationship has one, otherwise equivalence.
pub fn describes(incoming: &Relationship, stored: &Relationship, distinguishing: &[String]) -> bool {
    match (incoming.id(), stored.id()) {
        (Some(a), Some(b)) if a == b => true,
        _ => is_equivalent(incoming, stored, distinguishing),
    }
}

/// Pick the id to write `rel` under, given the relationships already stored
/// on its source twin.
///
/// An equivalent stored relationship that already uses the canonical id
/// wins; otherwise the lexicographically smallest equivalent legacy id is
/// reused; otherwise the canonical id is used. The result is the same no
/// matter how often it is applied.
pub fn reconcile(
    rel: &Relationship,
    existing: &[Relationship],
    distinguishing: &[String],
) -> ResolvedId {
    if let Some(id) = rel.id() {
        return ResolvedId {
            id: id.to_string(),
            source: IdSource::Explicit,
        };
    }

    let canonical = canonical_id(rel, distinguishing);
    let mut legacy: Vec<&str> = Vec::new();
    for stored in existing.iter().filter(|s| is_equivalent(rel, s, distinguishing)) {
        match stored.id() {
            Some(id) if id == canonical => {
                return ResolvedId {
                    id: canonical,
                    source: IdSource::Canonical,
                }
            }
            Some(id) => legacy.push(id),
            None => {}
        }
    }

    legacy.sort_unstable();
    match legacy.as_slice() {
        [] => ResolvedId {
            id: canonical,
            source: IdSource::Canonical,
        },
        [first, rest @ ..] => {
            if !rest.is_empty() {
                tracing::warn!(
                    source = %rel.source_id,
                    name = %rel.name,
                    target = %rel.target_id,
                    candidates = legacy.len(),
                    chosen = %first,
                    "multiple equivalent legacy relationships"
                );
            }
            ResolvedId {
                id: first.to_string(),
                source: IdSource::Legacy,
            }
        }
    }
}

/// Resolves ids against the relationships stored on each source twin.
pub struct RelationshipResolver {
    reader: Arc<dyn GraphReader>,
    distinguishing: Vec<String>,
}

impl RelationshipResolver {
    pub fn new(reader: Arc<dyn GraphReader>, distinguishing: Vec<String>) -> Self {
        Self {
            reader,
            distinguishing,
        }
    }

    pub fn distinguishing(&self) -> &[String] {
        &self.distinguishing
    }

    /// Resolve the id `rel` should be written under. A failed lookup of
    /// existing relationships is treated as "none exist".
    pub async fn resolve(&self, rel: &Relationship) -> ResolvedId {
        if let Some(id) = rel.id() {
            return ResolvedId {
                id: id.to_string(),
                source: IdSource::Explicit,
            };
        }

        let existing = match self.reader.get_outgoing_relationships(&rel.source_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(source = %rel.source_id, error = %e, "could not list existing relationships");
                Vec::new()
            }
        };
        let resolved = reconcile(rel, &existing, &self.distinguishing);
        if resolved.source == IdSource::Legacy {
            tracing::debug!(id = %resolved.id, "reusing legacy relationship id");
        }
        resolved
    }
}
