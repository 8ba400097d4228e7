//! Per-guild channel directory.
//!
//! A full server scan produces a [`CatalogSnapshot`]: every mapped channel
//! gets a stable 1-based number (text channels first, then forums, then a
//! bounded slice of active threads) and a set of normalized name aliases, all
//! pointing at the same [`ChannelRecord`]. Lookup accepts the number, any
//! alias spelling, or progressively fuzzier name fragments. Snapshots are
//! replaced wholesale on re-scan; there is no incremental update.

use crate::transport::{ChannelKind, ChatTransport, GuildChannels, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// Active threads mapped per scan are capped so huge servers don't flood the
/// numbered catalog.
pub const MAX_MAPPED_THREADS: usize = 20;

/// One catalog entry. `number` is unique and contiguous from 1 within a
/// snapshot; `aliases` lists every key spelling that resolves to this record.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    pub number: usize,
    pub kind: ChannelKind,
    pub aliases: Vec<String>,
}

/// An alias that two channels both produced. The first-mapped channel keeps
/// the key; the collision is recorded instead of silently overwriting.
#[derive(Debug, Clone)]
pub struct AliasCollision {
    pub alias: String,
    pub kept: String,
    pub shadowed: String,
}

/// Immutable result of one server scan.
pub struct CatalogSnapshot {
    records: Vec<Arc<ChannelRecord>>,
    by_alias: HashMap<String, usize>,
    alias_collisions: Vec<AliasCollision>,
}

/// Primary alias: NFKD compatibility decomposition, then stripped to ASCII
/// letters/digits/spaces and lowercased. Names that strip to nothing (fully
/// non-Latin names, emoji-only decorations) fall back to a plain lowercase of
/// the original so they stay resolvable.
pub fn primary_key(name: &str) -> String {
    let stripped = name
        .nfkd()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string();
    if stripped.is_empty() {
        name.to_lowercase().trim().to_string()
    } else {
        stripped
    }
}

/// Every alias spelling a channel name is reachable under, primary first,
/// deduplicated while preserving order.
pub fn alias_keys(name: &str) -> Vec<String> {
    let raw_lower = name.to_lowercase().trim().to_string();
    let alnum_only: String = raw_lower
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let spaced = raw_lower.replace(['-', '_'], " ");

    let mut keys = Vec::new();
    for key in [primary_key(name), raw_lower, alnum_only, spaced] {
        let key = key.trim().to_string();
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn strip_special(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .replace(['-', '_'], " ")
        .trim()
        .to_string()
}

impl CatalogSnapshot {
    /// Build a snapshot from a guild listing. Numbering order: readable text
    /// channels, then forum containers, then up to [`MAX_MAPPED_THREADS`]
    /// active threads, each in the listing order the transport returned.
    pub fn build(listing: &GuildChannels) -> Self {
        let mut snapshot = Self {
            records: Vec::new(),
            by_alias: HashMap::new(),
            alias_collisions: Vec::new(),
        };

        for channel in &listing.text {
            snapshot.push(&channel.id, &channel.name, ChannelKind::Text);
        }
        for forum in &listing.forums {
            snapshot.push(&forum.id, &forum.name, ChannelKind::Forum);
        }
        for thread in listing.threads.iter().filter(|t| !t.archived).take(MAX_MAPPED_THREADS) {
            let display = format!("Thread: {}", thread.name);
            snapshot.push(&thread.id, &display, ChannelKind::Thread);
        }

        for collision in &snapshot.alias_collisions {
            tracing::warn!(
                "channel alias '{}' of '{}' is shadowed by '{}'",
                collision.alias,
                collision.shadowed,
                collision.kept
            );
        }

        snapshot
    }

    fn push(&mut self, id: &str, name: &str, kind: ChannelKind) {
        let index = self.records.len();
        let aliases = alias_keys(name);
        for alias in &aliases {
            match self.by_alias.get(alias) {
                // First writer keeps the key; later channels with the same
                // spelling are recorded as shadowed, not silently dropped.
                Some(&existing) => self.alias_collisions.push(AliasCollision {
                    alias: alias.clone(),
                    kept: self.records[existing].name.clone(),
                    shadowed: name.to_string(),
                }),
                None => {
                    self.by_alias.insert(alias.clone(), index);
                }
            }
        }
        self.records.push(Arc::new(ChannelRecord {
            id: id.to_string(),
            name: name.to_string(),
            number: index + 1,
            kind,
            aliases,
        }));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in catalog (number) order.
    pub fn records(&self) -> &[Arc<ChannelRecord>] {
        &self.records
    }

    pub fn collisions(&self) -> &[AliasCollision] {
        &self.alias_collisions
    }

    pub fn by_number(&self, number: usize) -> Option<Arc<ChannelRecord>> {
        number.checked_sub(1).and_then(|i| self.records.get(i)).cloned()
    }

    pub fn by_id(&self, channel_id: &str) -> Option<Arc<ChannelRecord>> {
        self.records.iter().find(|r| r.id == channel_id).cloned()
    }

    /// Resolve a free-form query. Stages, first hit wins:
    /// number, exact alias, alias equality after stripping punctuation,
    /// all-query-tokens-as-substrings, raw-name containment. Within a stage
    /// the catalog's insertion order decides between multiple matches.
    pub fn resolve(&self, query: &str) -> Option<Arc<ChannelRecord>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return None;
        }

        if let Ok(number) = normalized.parse::<usize>() {
            if let Some(record) = self.by_number(number) {
                return Some(record);
            }
        }

        if let Some(&index) = self.by_alias.get(&normalized) {
            return self.records.get(index).cloned();
        }

        let stripped_query = strip_special(&normalized);
        for record in &self.records {
            if record
                .aliases
                .iter()
                .any(|alias| strip_special(alias) == stripped_query)
            {
                return Some(record.clone());
            }
        }

        let tokens: Vec<&str> = stripped_query.split_whitespace().collect();
        if !tokens.is_empty() {
            for record in &self.records {
                if record.aliases.iter().any(|alias| {
                    let stripped_alias = strip_special(alias);
                    tokens.iter().all(|t| stripped_alias.contains(t))
                }) {
                    return Some(record.clone());
                }
            }
        }

        for record in &self.records {
            let name_lower = record.name.to_lowercase();
            if name_lower.contains(&normalized) || normalized.contains(&name_lower) {
                return Some(record.clone());
            }
        }

        None
    }

    /// Loose suggestions for a failed lookup: channels whose name contains
    /// any query token longer than two characters, in catalog order.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<Arc<ChannelRecord>> {
        let stripped = strip_special(&normalize_query(query));
        let tokens: Vec<&str> = stripped
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        self.records
            .iter()
            .filter(|record| {
                let name_lower = record.name.to_lowercase();
                tokens.iter().any(|t| name_lower.contains(t))
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Owner of per-guild snapshots. Scans replace a guild's snapshot as a whole;
/// readers always see either the old or the new catalog, never a mix.
#[derive(Default)]
pub struct DirectoryStore {
    guilds: Mutex<HashMap<String, Arc<CatalogSnapshot>>>,
}

impl DirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a guild through the transport and install a fresh snapshot.
    pub async fn map_server(
        &self,
        transport: &dyn ChatTransport,
        guild_id: &str,
    ) -> Result<Arc<CatalogSnapshot>, TransportError> {
        let listing = transport.guild_channels(guild_id).await?;
        let snapshot = Arc::new(CatalogSnapshot::build(&listing));
        tracing::info!(
            "mapped {} channels for guild {guild_id}",
            snapshot.len()
        );
        self.guilds
            .lock()
            .insert(guild_id.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub fn snapshot(&self, guild_id: &str) -> Option<Arc<CatalogSnapshot>> {
        self.guilds.lock().get(guild_id).cloned()
    }

    pub fn is_mapped(&self, guild_id: &str) -> bool {
        self.guilds.lock().contains_key(guild_id)
    }

    pub fn resolve(&self, guild_id: &str, query: &str) -> Option<Arc<ChannelRecord>> {
        self.snapshot(guild_id)?.resolve(query)
    }

    pub fn find_by_id(&self, guild_id: &str, channel_id: &str) -> Option<Arc<ChannelRecord>> {
        self.snapshot(guild_id)?.by_id(channel_id)
    }

    pub fn invalidate_server(&self, guild_id: &str) {
        self.guilds.lock().remove(guild_id);
    }
}
