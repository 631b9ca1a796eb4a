//! Core data models used throughout Dataset Search.
//!
//! Catalogue records flow in from the remote catalogue and are replaced
//! wholesale on every sync. Retrieval hits, grouped results and results
//! sessions flow through the query pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ============ Catalogue ============

/// One dataset record of the remote catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueItem {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    /// Free text; may contain HTML markup.
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

impl CatalogueItem {
    pub fn has_notes(&self) -> bool {
        self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
    }

    pub fn notes_key(&self) -> EntryKey {
        EntryKey::new(EntryKind::Notes, &self.id)
    }

    /// Dataset landing page, if the catalogue publishes one.
    pub fn landing_url(&self) -> Option<String> {
        self.url.clone().filter(|u| !u.trim().is_empty())
    }

    pub fn to_document_ref(&self) -> DocumentRef {
        DocumentRef {
            id: self.id.clone(),
            title: self.title.clone(),
            url: self.landing_url(),
        }
    }
}

/// A resource record exactly as the catalogue publishes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResource {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub format: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
}

/// Kind of downloadable artifact, inferred from the resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Profile,
    Flyer,
}

impl ResourceKind {
    /// `profile` wins over `flyer` when a name mentions both.
    pub fn infer(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("profile") {
            Some(ResourceKind::Profile)
        } else if lower.contains("flyer") {
            Some(ResourceKind::Flyer)
        } else {
            None
        }
    }
}

/// A downloadable artifact belonging to a [`CatalogueItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResource {
    pub id: String,
    /// Non-owning back-reference to the parent [`CatalogueItem::id`].
    pub parent_id: String,
    pub name: String,
    pub format: String,
    pub url: String,
    pub kind: ResourceKind,
}

impl FileResource {
    /// Derive the file resources of a snapshot.
    ///
    /// Every returned resource references an item of `items`, so the
    /// `parent_id` invariant holds by construction.
    pub fn derive_all(items: &[CatalogueItem]) -> Vec<FileResource> {
        items
            .iter()
            .flat_map(|item| {
                item.resources.iter().filter_map(move |res| {
                    let kind = ResourceKind::infer(&res.name)?;
                    Some(FileResource {
                        id: res.id.clone(),
                        parent_id: item.id.clone(),
                        name: res.name.clone(),
                        format: res.format.clone(),
                        url: res.url.trim().to_string(),
                        kind,
                    })
                })
            })
            .collect()
    }

    pub fn entry_key(&self) -> EntryKey {
        EntryKey::new(self.kind.into(), &self.id)
    }

    /// File extension: the declared format, falling back to the URL suffix.
    pub fn extension(&self) -> String {
        let declared = self.format.trim().trim_start_matches('.').to_lowercase();
        if !declared.is_empty() && declared.chars().all(|c| c.is_ascii_alphanumeric()) {
            return declared;
        }
        self.url
            .rsplit('/')
            .next()
            .and_then(|last| last.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "bin".to_string())
    }

    pub fn file_name(&self) -> String {
        self.entry_key().file_name(&self.extension())
    }
}

// ============ Cache entries ============

/// Kind of a local cache entry. Shares the id space with catalogue and
/// resource ids, so the kind is part of every entry's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Profile,
    Flyer,
    Notes,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Profile => "profile",
            EntryKind::Flyer => "flyer",
            EntryKind::Notes => "notes",
        }
    }
}

impl From<ResourceKind> for EntryKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Profile => EntryKind::Profile,
            ResourceKind::Flyer => EntryKind::Flyer,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(EntryKind::Profile),
            "flyer" => Ok(EntryKind::Flyer),
            "notes" => Ok(EntryKind::Notes),
            other => Err(format!("unknown cache entry kind: {}", other)),
        }
    }
}

/// Identity of a cache entry: `{kind}-{id}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub kind: EntryKind,
    pub id: String,
}

impl EntryKey {
    pub fn new(kind: EntryKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the id can be used as part of a single file name.
    ///
    /// Ids come from the remote catalogue. Path separators, NUL and other
    /// control characters would let a file name leave the cache directory.
    pub fn is_file_safe(&self) -> bool {
        is_file_safe_id(&self.id)
    }

    /// Parse a file stem such as `profile-2f9c...` or `notes-abc`.
    ///
    /// The kind never contains `-`, so the stem is split at the first one;
    /// ids may contain further dashes.
    pub fn parse(stem: &str) -> Option<Self> {
        let (kind, id) = stem.split_once('-')?;
        let kind = kind.parse().ok()?;
        if !is_file_safe_id(id) {
            return None;
        }
        Some(Self::new(kind, id))
    }

    /// Parse a cache file name (`{kind}-{id}.{ext}`) back into its key.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Self::parse(stem)
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self, extension)
    }
}

fn is_file_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(|c: char| c == '/' || c == '\\' || c.is_control())
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

impl Serialize for EntryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stem = String::deserialize(deserializer)?;
        EntryKey::parse(&stem)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid cache entry key: {}", stem)))
    }
}

// ============ Retrieval ============

/// A chunk-level hit returned by the external similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub document_id: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Metadata of a source document (a catalogue dataset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
}

/// One result per distinct document among a hit set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedResult {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub score: f64,
    /// Member chunks in arrival order, joined with the chunk separator.
    pub content: String,
    /// Number of chunks merged into this result.
    pub chunks: usize,
}

impl GroupedResult {
    pub fn to_document_ref(&self) -> DocumentRef {
        DocumentRef {
            id: self.id.clone(),
            title: self.title.clone().unwrap_or_else(|| self.id.clone()),
            url: self.url.clone(),
        }
    }
}

/// A query and its grouped results, addressable by `results_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSession {
    pub results_id: String,
    pub query: String,
    pub grouped_results: Vec<GroupedResult>,
    pub created_at: DateTime<Utc>,
}

/// The shape of a query answer, resolved once at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Grouped { results: Vec<GroupedResult> },
    Generated { text: String, sources: Vec<DocumentRef> },
}
