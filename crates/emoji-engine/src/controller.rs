//! Session state machine behind the emoji grid.
//!
//! `Idle` accepts a generate or a seed batch; `Generating` and
//! `SeedGenerating` reject both until the in-flight work is reconciled. Like
//! toggles and downloads are allowed in every state.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use emoji_contracts::entries::{EmojiEntry, EmojiList, EntryState};
use emoji_contracts::storage::{CacheLoad, EmojiCache, KeyValueStore, StorageError};
use reqwest::blocking::Client as HttpClient;
use tracing::{info, warn};

use crate::{download_emoji, EmojiGenerator, GenerationError, PROMPT_REQUIRED};

pub const DEFAULT_PROMPTS: [&str; 8] = [
    "cat", "dog", "bird", "horse", "fish", "rabbit", "elephant", "lion",
];

pub const GENERATE_ERROR_MESSAGE: &str = "Error generating emoji. Please try again.";
pub const SEED_ERROR_MESSAGE: &str = "Error generating initial emojis. Please refresh the page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    SeedGenerating,
    Generating,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("a generation is already in progress")]
    Busy,
    #[error("no emoji at index {0}")]
    NoEntry(usize),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Ticket for the placeholder inserted by [`GeneratorController::begin_generate`].
///
/// The controller stays in `Generating` with the placeholder at the head until
/// the ticket is handed back to [`GeneratorController::finish_generate`] or
/// [`GeneratorController::cancel_generate`].
#[derive(Debug)]
#[must_use = "a pending generation has to be finished"]
pub struct PendingGeneration {
    prompt: String,
}

impl PendingGeneration {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

type SeedResult = (usize, Result<String, GenerationError>);

pub struct GeneratorController<G, S> {
    generator: Arc<G>,
    cache: EmojiCache<S>,
    entries: EmojiList,
    state: ControllerState,
    last_error: Option<String>,
    http: Option<HttpClient>,
}

impl<G: EmojiGenerator + 'static, S: KeyValueStore> GeneratorController<G, S> {
    /// Loads the cached list, adopting `seed_urls` when nothing is cached and
    /// running the default seed batch when neither exists. A failed batch is
    /// reported through [`Self::last_error`]. Placeholders left in the cache
    /// by an interrupted generation are dropped.
    pub fn open(generator: G, store: S, seed_urls: &[String]) -> Self {
        let mut cache = EmojiCache::new(store);
        let loaded = cache.load(seed_urls);
        let mut controller = Self {
            generator: Arc::new(generator),
            cache,
            entries: EmojiList::new(),
            state: ControllerState::Idle,
            last_error: None,
            http: None,
        };
        match loaded {
            CacheLoad::Cached(list) => {
                let resolved = list.resolved();
                if resolved.len() == list.len() {
                    controller.entries = list;
                } else {
                    warn!(
                        dropped = list.len() - resolved.len(),
                        "dropping stale placeholders from the emoji cache"
                    );
                    controller.entries = resolved;
                    let _ = controller.persist();
                }
            }
            CacheLoad::Seeded(list) => controller.entries = list,
            CacheLoad::ColdStart => {
                if let Err(err) = controller.seed() {
                    warn!(error = %err, "seed batch did not complete");
                }
            }
        }
        controller
    }

    pub fn entries(&self) -> &EmojiList {
        &self.entries
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_generating(&self) -> bool {
        self.state != ControllerState::Idle
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn cache(&self) -> &EmojiCache<S> {
        &self.cache
    }

    /// Generates one emoji per default prompt concurrently. The list is only
    /// replaced when every request succeeds. The first failure ends the batch
    /// without waiting for the remaining requests; the list is left empty and
    /// nothing is persisted.
    pub fn seed(&mut self) -> Result<(), ControllerError> {
        if self.state != ControllerState::Idle {
            return Err(ControllerError::Busy);
        }
        self.state = ControllerState::SeedGenerating;
        self.last_error = None;
        info!(count = DEFAULT_PROMPTS.len(), "generating seed emojis");

        let outcome = self.spawn_seed_workers().and_then(collect_seed_results);
        self.state = ControllerState::Idle;

        match outcome {
            Ok(urls) => {
                self.entries = EmojiList::from_urls(urls);
                self.persist()?;
                info!(count = self.entries.len(), "seed emojis ready");
                Ok(())
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "seed batch failed");
                self.entries = EmojiList::new();
                self.last_error = Some(SEED_ERROR_MESSAGE.to_string());
                Err(err.into())
            }
        }
    }

    /// Inserts a loading placeholder at the head of the list.
    pub fn begin_generate(&mut self, prompt: &str) -> Result<PendingGeneration, ControllerError> {
        if self.state != ControllerState::Idle {
            return Err(ControllerError::Busy);
        }
        if prompt.trim().is_empty() {
            return Err(GenerationError::Validation(PROMPT_REQUIRED.to_string()).into());
        }
        self.last_error = None;
        self.entries.push_front(EmojiEntry::pending());
        self.state = ControllerState::Generating;
        Ok(PendingGeneration {
            prompt: prompt.to_string(),
        })
    }

    /// Resolves the placeholder in place on success, removes it on failure.
    /// The list is persisted either way.
    pub fn finish_generate(
        &mut self,
        pending: PendingGeneration,
        result: Result<String, GenerationError>,
    ) -> Result<(), ControllerError> {
        self.state = ControllerState::Idle;
        debug_assert!(self.entries.get(0).is_some_and(EmojiEntry::is_loading));

        match result {
            Ok(image_url) => {
                let is_liked = self.entries.get(0).is_some_and(|head| head.is_liked);
                self.entries.replace_head(EmojiEntry {
                    state: EntryState::Resolved { image_url },
                    is_liked,
                });
                info!(prompt = pending.prompt(), "emoji generated");
                self.persist()?;
                Ok(())
            }
            Err(err) => {
                warn!(
                    prompt = pending.prompt(),
                    kind = err.kind(),
                    error = %err,
                    "emoji generation failed"
                );
                self.entries.remove_head();
                self.last_error = Some(GENERATE_ERROR_MESSAGE.to_string());
                self.persist()?;
                Err(err.into())
            }
        }
    }

    /// Drops the placeholder without recording an error.
    pub fn cancel_generate(&mut self, pending: PendingGeneration) -> Result<(), ControllerError> {
        self.state = ControllerState::Idle;
        if self.entries.get(0).is_some_and(EmojiEntry::is_loading) {
            self.entries.remove_head();
        }
        info!(prompt = pending.prompt(), "emoji generation cancelled");
        self.persist()?;
        Ok(())
    }

    pub fn generate(&mut self, prompt: &str) -> Result<(), ControllerError> {
        let pending = self.begin_generate(prompt)?;
        let result = self.generator.generate_emoji(pending.prompt());
        self.finish_generate(pending, result)
    }

    /// Returns the new liked flag.
    pub fn toggle_like(&mut self, index: usize) -> Result<bool, ControllerError> {
        let liked = self
            .entries
            .toggle_like(index)
            .ok_or(ControllerError::NoEntry(index))?;
        self.persist()?;
        Ok(liked)
    }

    /// Saves `emoji-<index + 1>.png` into `out_dir`. Failures are logged and
    /// yield `None`.
    pub fn download(&mut self, index: usize, out_dir: &Path) -> Option<PathBuf> {
        let Some(image_url) = self
            .entries
            .get(index)
            .and_then(EmojiEntry::image_url)
            .map(str::to_string)
        else {
            warn!(index, "nothing to download at this index");
            return None;
        };
        let http = self.http.get_or_insert_with(HttpClient::new);
        match download_emoji(http, &image_url, out_dir, index + 1) {
            Ok(path) => {
                info!(path = %path.display(), "emoji downloaded");
                Some(path)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), image_url = %image_url, "error downloading emoji");
                None
            }
        }
    }

    /// Workers are detached so a failed request can end the batch while
    /// others are still running; late results go nowhere.
    fn spawn_seed_workers(&self) -> Result<Receiver<SeedResult>, GenerationError> {
        let (tx, rx) = mpsc::channel();
        for (slot, &prompt) in DEFAULT_PROMPTS.iter().enumerate() {
            let generator = Arc::clone(&self.generator);
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("seed-{prompt}"))
                .spawn(move || {
                    let _ = tx.send((slot, generator.generate_emoji(prompt)));
                })
                .map_err(|err| {
                    GenerationError::Transport(format!("failed to start seed worker: {err}"))
                })?;
        }
        Ok(rx)
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        self.cache.save(&self.entries).inspect_err(|err| {
            warn!(error = %err, "failed to persist emoji list");
        })
    }
}

/// Waits for every default prompt, returning URLs in prompt order, or the
/// first error as soon as it arrives.
fn collect_seed_results(rx: Receiver<SeedResult>) -> Result<Vec<String>, GenerationError> {
    let mut urls: Vec<Option<String>> = vec![None; DEFAULT_PROMPTS.len()];
    for _ in 0..DEFAULT_PROMPTS.len() {
        let (slot, result) = rx.recv().map_err(|_| {
            GenerationError::Transport("seed generation worker panicked".to_string())
        })?;
        urls[slot] = Some(result?);
    }
    Ok(urls.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use emoji_contracts::entries::{EmojiEntry, EmojiList};
    use emoji_contracts::storage::{KeyValueStore, MemoryStore, CACHE_KEY};
    use serde_json::{json, Value};

    use crate::test_support::{CannedResponse, TestServer};
    use crate::{EmojiGenerator, GenerationError};

    use super::{
        ControllerError, ControllerState, GeneratorController, DEFAULT_PROMPTS,
        GENERATE_ERROR_MESSAGE, SEED_ERROR_MESSAGE,
    };

    #[derive(Clone, Default)]
    struct FakeGenerator {
        fail_on: Option<&'static str>,
        calls: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl FakeGenerator {
        fn failing_on(prompt: &'static str) -> Self {
            Self {
                fail_on: Some(prompt),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EmojiGenerator for FakeGenerator {
        fn generate_emoji(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            // Scramble completion order across the seed batch.
            let rank = DEFAULT_PROMPTS
                .iter()
                .position(|candidate| *candidate == prompt)
                .unwrap_or(0);
            std::thread::sleep(Duration::from_millis(((8 - rank) * 3) as u64));
            if self.fail_on == Some(prompt) {
                return Err(GenerationError::Provider("model exploded".to_string()));
            }
            Ok(format!("https://provider/{prompt}.png"))
        }
    }

    /// Fails "cat" at once and holds every other prompt for a while.
    struct FailsCatFast;

    impl EmojiGenerator for FailsCatFast {
        fn generate_emoji(&self, prompt: &str) -> Result<String, GenerationError> {
            if prompt == "cat" {
                return Err(GenerationError::Provider("model exploded".to_string()));
            }
            std::thread::sleep(Duration::from_secs(3));
            Ok(format!("https://provider/{prompt}.png"))
        }
    }

    fn store_with(list: &EmojiList) -> anyhow::Result<MemoryStore> {
        let mut store = MemoryStore::new();
        store.set(CACHE_KEY, &serde_json::to_vec(list)?)?;
        Ok(store)
    }

    fn persisted(controller: &GeneratorController<FakeGenerator, MemoryStore>) -> Option<Value> {
        controller
            .cache()
            .store()
            .raw(CACHE_KEY)
            .and_then(|raw| serde_json::from_slice(raw).ok())
    }

    fn empty_controller() -> anyhow::Result<GeneratorController<FakeGenerator, MemoryStore>> {
        Ok(GeneratorController::open(
            FakeGenerator::default(),
            store_with(&EmojiList::new())?,
            &[],
        ))
    }

    #[test]
    fn generate_shows_placeholder_then_resolves_in_place() -> anyhow::Result<()> {
        let mut controller = empty_controller()?;

        let pending = controller.begin_generate("cat")?;
        assert_eq!(controller.state(), ControllerState::Generating);
        assert_eq!(
            serde_json::to_value(controller.entries())?,
            json!([{"imageUrl": null, "isLoading": true, "loadingStep": "Generating...", "isLiked": false}])
        );

        controller.finish_generate(pending, Ok("https://provider/x.png".to_string()))?;
        let expected = json!([{
            "imageUrl": "https://provider/x.png",
            "isLoading": false,
            "loadingStep": "",
            "isLiked": false,
        }]);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(serde_json::to_value(controller.entries())?, expected);
        assert_eq!(persisted(&controller), Some(expected));
        Ok(())
    }

    #[test]
    fn successful_generate_prepends_one_entry() -> anyhow::Result<()> {
        let existing = EmojiList::from_urls(["https://provider/old-1.png", "https://provider/old-2.png"]);
        let mut controller =
            GeneratorController::open(FakeGenerator::default(), store_with(&existing)?, &[]);

        controller.generate("owl")?;
        let urls: Vec<Option<&str>> = controller
            .entries()
            .iter()
            .map(EmojiEntry::image_url)
            .collect();
        assert_eq!(
            urls,
            vec![
                Some("https://provider/owl.png"),
                Some("https://provider/old-1.png"),
                Some("https://provider/old-2.png"),
            ]
        );
        assert_eq!(controller.generator().calls(), 1);
        Ok(())
    }

    #[test]
    fn failed_generate_rolls_back_and_reports() -> anyhow::Result<()> {
        let existing = EmojiList::from_urls(["https://provider/old.png"]);
        let mut controller = GeneratorController::open(
            FakeGenerator::failing_on("owl"),
            store_with(&existing)?,
            &[],
        );

        let err = controller.generate("owl").err();
        assert!(matches!(err, Some(ControllerError::Generation(_))));
        assert_eq!(controller.entries(), &existing);
        assert_eq!(controller.last_error(), Some(GENERATE_ERROR_MESSAGE));
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(persisted(&controller), Some(serde_json::to_value(&existing)?));
        Ok(())
    }

    #[test]
    fn empty_prompt_is_rejected_without_side_effects() -> anyhow::Result<()> {
        let mut controller = empty_controller()?;
        let err = controller.generate("   ").err();
        assert!(matches!(
            err,
            Some(ControllerError::Generation(GenerationError::Validation(_)))
        ));
        assert!(controller.entries().is_empty());
        assert_eq!(controller.generator().calls(), 0);
        assert_eq!(controller.state(), ControllerState::Idle);
        Ok(())
    }

    #[test]
    fn second_generate_while_in_flight_is_busy() -> anyhow::Result<()> {
        let mut controller = empty_controller()?;
        let pending = controller.begin_generate("cat")?;
        assert!(controller.is_generating());
        assert!(matches!(
            controller.begin_generate("dog"),
            Err(ControllerError::Busy)
        ));
        assert!(matches!(controller.seed(), Err(ControllerError::Busy)));
        assert_eq!(controller.entries().len(), 1);

        controller.finish_generate(pending, Ok("https://provider/cat.png".to_string()))?;
        assert!(!controller.is_generating());
        Ok(())
    }

    #[test]
    fn like_toggle_is_persisted_and_reversible() -> anyhow::Result<()> {
        let existing = EmojiList::from_urls(["https://provider/a.png", "https://provider/b.png"]);
        let mut controller =
            GeneratorController::open(FakeGenerator::default(), store_with(&existing)?, &[]);

        assert!(controller.toggle_like(1)?);
        assert_eq!(
            persisted(&controller),
            Some(serde_json::to_value(controller.entries())?)
        );
        assert_eq!(persisted(&controller).map(|rows| rows[1]["isLiked"].clone()), Some(json!(true)));

        assert!(!controller.toggle_like(1)?);
        assert_eq!(controller.entries(), &existing);
        assert_eq!(persisted(&controller), Some(serde_json::to_value(&existing)?));

        assert!(matches!(
            controller.toggle_like(9),
            Err(ControllerError::NoEntry(9))
        ));
        Ok(())
    }

    #[test]
    fn like_during_generation_persists_the_whole_list() -> anyhow::Result<()> {
        let existing = EmojiList::from_urls(["https://provider/a.png"]);
        let mut controller =
            GeneratorController::open(FakeGenerator::default(), store_with(&existing)?, &[]);

        let pending = controller.begin_generate("cat")?;
        controller.toggle_like(1)?;
        assert_eq!(controller.state(), ControllerState::Generating);
        let stored = persisted(&controller).unwrap_or(Value::Null);
        assert_eq!(stored, serde_json::to_value(controller.entries())?);
        assert_eq!(stored[0]["isLoading"], json!(true));
        assert_eq!(stored[1]["isLiked"], json!(true));

        controller.finish_generate(pending, Ok("https://provider/cat.png".to_string()))?;
        let stored = persisted(&controller).unwrap_or(Value::Null);
        assert_eq!(stored, serde_json::to_value(controller.entries())?);
        assert_eq!(stored[0]["isLiked"], json!(false));
        assert_eq!(stored[1]["isLiked"], json!(true));
        Ok(())
    }

    #[test]
    fn liked_placeholder_stays_liked_once_resolved() -> anyhow::Result<()> {
        let mut controller = empty_controller()?;
        let pending = controller.begin_generate("cat")?;
        assert!(controller.toggle_like(0)?);

        controller.finish_generate(pending, Ok("https://provider/cat.png".to_string()))?;
        let expected = json!([{
            "imageUrl": "https://provider/cat.png",
            "isLoading": false,
            "loadingStep": "",
            "isLiked": true,
        }]);
        assert_eq!(serde_json::to_value(controller.entries())?, expected);
        assert_eq!(persisted(&controller), Some(expected));
        Ok(())
    }

    #[test]
    fn stale_placeholder_in_cache_is_dropped_on_open() -> anyhow::Result<()> {
        let mut interrupted = EmojiList::from_urls(["https://provider/a.png"]);
        interrupted.push_front(EmojiEntry::pending());
        let generator = FakeGenerator::default();
        let controller = GeneratorController::open(generator.clone(), store_with(&interrupted)?, &[]);

        let expected = EmojiList::from_urls(["https://provider/a.png"]);
        assert_eq!(controller.entries(), &expected);
        assert_eq!(persisted(&controller), Some(serde_json::to_value(&expected)?));
        assert_eq!(generator.calls(), 0);
        Ok(())
    }

    #[test]
    fn cancel_generate_removes_placeholder_and_frees_controller() -> anyhow::Result<()> {
        let existing = EmojiList::from_urls(["https://provider/a.png"]);
        let mut controller =
            GeneratorController::open(FakeGenerator::default(), store_with(&existing)?, &[]);

        let pending = controller.begin_generate("cat")?;
        controller.cancel_generate(pending)?;
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.entries(), &existing);
        assert_eq!(controller.last_error(), None);
        assert_eq!(persisted(&controller), Some(serde_json::to_value(&existing)?));

        controller.generate("dog")?;
        assert_eq!(controller.entries().len(), 2);
        Ok(())
    }

    #[test]
    fn cold_start_seeds_default_prompts_in_order() {
        let generator = FakeGenerator::default();
        let controller = GeneratorController::open(generator.clone(), MemoryStore::new(), &[]);

        assert_eq!(generator.calls(), 8);
        let urls: Vec<String> = controller
            .entries()
            .iter()
            .filter_map(|entry| entry.image_url().map(str::to_string))
            .collect();
        let expected: Vec<String> = DEFAULT_PROMPTS
            .iter()
            .map(|prompt| format!("https://provider/{prompt}.png"))
            .collect();
        assert_eq!(urls, expected);
        assert_eq!(controller.last_error(), None);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(
            persisted(&controller).and_then(|rows| rows.as_array().map(Vec::len)),
            Some(8)
        );
    }

    #[test]
    fn cold_start_failure_keeps_nothing() {
        let generator = FakeGenerator::failing_on("horse");
        let controller = GeneratorController::open(generator.clone(), MemoryStore::new(), &[]);

        assert!(generator
            .prompts
            .lock()
            .is_ok_and(|prompts| prompts.iter().any(|prompt| prompt == "horse")));
        assert!(controller.entries().is_empty());
        assert_eq!(controller.last_error(), Some(SEED_ERROR_MESSAGE));
        assert_eq!(controller.cache().store().raw(CACHE_KEY), None);
    }

    #[test]
    fn seed_failure_surfaces_without_waiting_for_slow_requests() {
        let started = Instant::now();
        let controller = GeneratorController::open(FailsCatFast, MemoryStore::new(), &[]);

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(controller.last_error(), Some(SEED_ERROR_MESSAGE));
        assert!(controller.entries().is_empty());
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.cache().store().raw(CACHE_KEY), None);
    }

    #[test]
    fn seed_urls_skip_generation() {
        let generator = FakeGenerator::default();
        let seed = vec!["https://provider/seed.png".to_string()];
        let controller = GeneratorController::open(generator.clone(), MemoryStore::new(), &seed);

        assert_eq!(generator.calls(), 0);
        assert_eq!(controller.entries(), &EmojiList::from_urls(seed));
    }

    #[test]
    fn cached_list_is_used_as_is() -> anyhow::Result<()> {
        let generator = FakeGenerator::default();
        let existing = EmojiList::from_urls(["https://provider/a.png"]);
        let controller = GeneratorController::open(generator.clone(), store_with(&existing)?, &[]);
        assert_eq!(generator.calls(), 0);
        assert_eq!(controller.entries(), &existing);
        Ok(())
    }

    #[test]
    fn download_names_file_by_position() -> anyhow::Result<()> {
        let server = TestServer::bind()?;
        let base = server.url()?;
        let handle = server.serve(vec![CannedResponse::bytes("text/plain", b"emoji".to_vec())]);

        let existing = EmojiList::from_urls([
            "https://provider/a.png".to_string(),
            format!("{base}/pbxt/b.png"),
        ]);
        let mut controller =
            GeneratorController::open(FakeGenerator::default(), store_with(&existing)?, &[]);

        let temp = tempfile::tempdir()?;
        let path = controller.download(1, temp.path());
        assert_eq!(path, Some(temp.path().join("emoji-2.png")));
        assert_eq!(std::fs::read(temp.path().join("emoji-2.png"))?, b"emoji".to_vec());
        assert_eq!(controller.entries(), &existing);
        let _ = handle.join();
        Ok(())
    }

    #[test]
    fn download_of_placeholder_or_missing_entry_is_swallowed() -> anyhow::Result<()> {
        let mut controller = empty_controller()?;
        let temp = tempfile::tempdir()?;
        assert_eq!(controller.download(0, temp.path()), None);

        let pending = controller.begin_generate("cat")?;
        assert_eq!(controller.download(0, temp.path()), None);
        let _ = controller.finish_generate(
            pending,
            Err(GenerationError::Transport("reset".to_string())),
        );
        assert!(std::fs::read_dir(temp.path())?.next().is_none());
        Ok(())
    }
}
