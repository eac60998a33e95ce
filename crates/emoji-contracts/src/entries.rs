use serde::{Deserialize, Serialize};

/// Status line shown on a placeholder card while its request is in flight.
pub const GENERATING_STEP: &str = "Generating...";

/// One card in the emoji grid.
///
/// Persisted with the flat camelCase shape the browser cache always used
/// (`imageUrl`, `isLoading`, `loadingStep`, `isLiked`). Objects that mix a
/// loading flag with an image URL are rejected on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawEntry", try_from = "RawEntry")]
pub struct EmojiEntry {
    pub state: EntryState,
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Pending { loading_step: String },
    Resolved { image_url: String },
}

impl EmojiEntry {
    pub fn pending() -> Self {
        Self {
            state: EntryState::Pending {
                loading_step: GENERATING_STEP.to_string(),
            },
            is_liked: false,
        }
    }

    pub fn resolved(image_url: impl Into<String>) -> Self {
        Self {
            state: EntryState::Resolved {
                image_url: image_url.into(),
            },
            is_liked: false,
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match &self.state {
            EntryState::Resolved { image_url } => Some(image_url.as_str()),
            EntryState::Pending { .. } => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, EntryState::Pending { .. })
    }

    pub fn loading_step(&self) -> &str {
        match &self.state {
            EntryState::Pending { loading_step } => loading_step.as_str(),
            EntryState::Resolved { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    image_url: Option<String>,
    #[serde(default)]
    is_loading: bool,
    #[serde(default)]
    loading_step: String,
    #[serde(default)]
    is_liked: bool,
}

impl From<EmojiEntry> for RawEntry {
    fn from(entry: EmojiEntry) -> Self {
        match entry.state {
            EntryState::Pending { loading_step } => Self {
                image_url: None,
                is_loading: true,
                loading_step,
                is_liked: entry.is_liked,
            },
            EntryState::Resolved { image_url } => Self {
                image_url: Some(image_url),
                is_loading: false,
                loading_step: String::new(),
                is_liked: entry.is_liked,
            },
        }
    }
}

impl TryFrom<RawEntry> for EmojiEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let state = match (raw.is_loading, raw.image_url) {
            (true, None) => EntryState::Pending {
                loading_step: raw.loading_step,
            },
            (false, Some(image_url)) if !image_url.trim().is_empty() => {
                EntryState::Resolved { image_url }
            }
            (true, Some(_)) => return Err("loading entry must not carry an imageUrl".to_string()),
            (false, _) => return Err("resolved entry is missing its imageUrl".to_string()),
        };
        Ok(Self {
            state,
            is_liked: raw.is_liked,
        })
    }
}

/// Ordered emoji cards, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmojiList {
    entries: Vec<EmojiEntry>,
}

impl EmojiList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: urls.into_iter().map(EmojiEntry::resolved).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EmojiEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&EmojiEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmojiEntry> {
        self.entries.iter()
    }

    pub fn push_front(&mut self, entry: EmojiEntry) {
        self.entries.insert(0, entry);
    }

    /// Swaps the head entry for `entry`, returning the previous head.
    pub fn replace_head(&mut self, entry: EmojiEntry) -> Option<EmojiEntry> {
        let head = self.entries.first_mut()?;
        Some(std::mem::replace(head, entry))
    }

    pub fn remove_head(&mut self) -> Option<EmojiEntry> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0))
    }

    /// Flips `is_liked` at `index` and returns the new value.
    pub fn toggle_like(&mut self, index: usize) -> Option<bool> {
        let entry = self.entries.get_mut(index)?;
        entry.is_liked = !entry.is_liked;
        Some(entry.is_liked)
    }

    /// Copy of the list without in-flight placeholders.
    pub fn resolved(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|entry| !entry.is_loading())
                .cloned()
                .collect(),
        }
    }
}
