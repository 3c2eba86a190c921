use std::env;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;

use crate::error::{LibError, Result};

pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorConfig {
    /// Backend origin without a trailing slash, e.g. `https://admin.example.com/api`.
    pub base_url: String,
    pub workspace_id: Option<String>,
    pub autosave_delay: Duration,
    pub cache_capacity: NonZeroUsize,
    pub draft_dir: PathBuf,
}

impl EditorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace_id: None,
            autosave_delay: DEFAULT_AUTOSAVE_DELAY,
            cache_capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            draft_dir: PathBuf::from(".quest-drafts"),
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        let workspace_id = workspace_id.into();
        self.workspace_id = Some(workspace_id).filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_autosave_delay(mut self, delay: Duration) -> Self {
        self.autosave_delay = delay;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_draft_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.draft_dir = dir.into();
        self
    }

    /// Reads `QUEST_ADMIN_*` variables. Only the base url is required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("QUEST_ADMIN_BASE_URL").ok_or_else(|| {
            LibError::invalid(
                "QUEST_ADMIN_BASE_URL is required",
                anyhow!("QUEST_ADMIN_BASE_URL is not set"),
            )
        })?;
        let mut config = Self::new(base_url);

        if let Some(workspace_id) = lookup("QUEST_ADMIN_WORKSPACE_ID") {
            config = config.with_workspace(workspace_id);
        }
        if let Some(raw) = lookup("QUEST_ADMIN_AUTOSAVE_MS") {
            let millis: u64 = raw.trim().parse().map_err(|err| {
                LibError::invalid(
                    "QUEST_ADMIN_AUTOSAVE_MS must be a number of milliseconds",
                    anyhow!("invalid QUEST_ADMIN_AUTOSAVE_MS '{}': {}", raw, err),
                )
            })?;
            config.autosave_delay = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup("QUEST_ADMIN_CACHE_CAPACITY") {
            let capacity = raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or_else(|| {
                    LibError::invalid(
                        "QUEST_ADMIN_CACHE_CAPACITY must be a positive integer",
                        anyhow!("invalid QUEST_ADMIN_CACHE_CAPACITY '{}'", raw),
                    )
                })?;
            config.cache_capacity = capacity;
        }
        if let Some(dir) = lookup("QUEST_ADMIN_DRAFT_DIR") {
            config.draft_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}
