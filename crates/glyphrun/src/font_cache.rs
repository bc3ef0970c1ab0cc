//! Font instance cache
//!
//! Fonts are deduplicated by (entry identity, style). A font handed out as a
//! [`FontRef`] is *live*; when the last `FontRef` goes away the cache keeps
//! the font in a three-generation expiration tracker instead of dropping it,
//! so a re-layout that asks for the same font shortly after gets the same
//! instance back. Fonts that sit unused through every generation are dropped.
//!
//! Shaped words inside each font age on a separate, longer timer.

use crate::config::TextConfig;
use crate::font::Font;
use crate::font_entry::FontEntry;
use crate::style::FontStyle;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

new_key_type! {
    /// Handle to a font slot in the cache
    pub struct FontKey;
}

/// Number of expiration generations
const GENERATIONS: usize = 3;

/// Objects bucketed by the generation they were added in
///
/// Each [`age_one_generation`](Self::age_one_generation) reaps the oldest
/// bucket and reuses it for new additions, so an object added just after a
/// tick expires on the third tick that follows.
#[derive(Debug)]
pub struct ExpirationTracker<K> {
    generations: [Vec<K>; GENERATIONS],
    newest: usize,
}

impl<K: Copy + PartialEq> Default for ExpirationTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + PartialEq> ExpirationTracker<K> {
    pub fn new() -> Self {
        Self {
            generations: Default::default(),
            newest: 0,
        }
    }

    /// Tracks `key` in the newest generation and returns that generation.
    pub fn add(&mut self, key: K) -> usize {
        self.generations[self.newest].push(key);
        self.newest
    }

    pub fn remove(&mut self, key: K, generation: usize) {
        let bucket = &mut self.generations[generation];
        if let Some(pos) = bucket.iter().position(|&k| k == key) {
            bucket.swap_remove(pos);
        }
    }

    /// Expires the oldest generation and returns its keys.
    pub fn age_one_generation(&mut self) -> Vec<K> {
        let reap = (self.newest + 1) % GENERATIONS;
        let expired = std::mem::take(&mut self.generations[reap]);
        self.newest = reap;
        expired
    }

    /// Expires everything.
    pub fn age_all_generations(&mut self) -> Vec<K> {
        self.generations
            .iter_mut()
            .flat_map(std::mem::take)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.generations.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memory used by cached fonts, split by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontCacheSizes {
    pub fonts: usize,
    pub shaped_words: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Held by `strong` outstanding [`FontRef`]s
    Live { strong: usize },
    /// Unreferenced, waiting in an expiration generation
    Tracked { generation: usize },
}

type LookupKey = (usize, FontStyle);

#[derive(Debug)]
struct CachedFont {
    font: Rc<Font>,
    lookup_key: LookupKey,
    ownership: Ownership,
}

#[derive(Debug)]
struct Timer {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl Timer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// Number of intervals elapsed since the last firing, as of `now`.
    fn poll(&mut self, now: Instant) -> u32 {
        let Some(mut last) = self.last_fired else {
            self.last_fired = Some(now);
            return 0;
        };
        if self.interval.is_zero() {
            return 0;
        }
        let mut fired = 0;
        while now.saturating_duration_since(last) >= self.interval {
            last += self.interval;
            fired += 1;
        }
        self.last_fired = Some(last);
        fired
    }
}

#[derive(Debug)]
struct CacheState {
    fonts: SlotMap<FontKey, CachedFont>,
    lookup: FxHashMap<LookupKey, FontKey>,
    tracker: ExpirationTracker<FontKey>,
    font_timer: Timer,
    word_timer: Timer,
    word_max_age: u32,
    shutting_down: bool,
}

impl CacheState {
    /// Takes a strong reference on `key`, pulling it out of the tracker.
    fn acquire(&mut self, key: FontKey) {
        let Some(cached) = self.fonts.get_mut(key) else {
            return;
        };
        match cached.ownership {
            Ownership::Live { ref mut strong } => *strong += 1,
            Ownership::Tracked { generation } => {
                self.tracker.remove(key, generation);
                cached.ownership = Ownership::Live { strong: 1 };
            }
        }
    }

    /// Drops a strong reference; returns the font if it must be destroyed.
    fn release(&mut self, key: FontKey) -> Option<Rc<Font>> {
        let cached = self.fonts.get_mut(key)?;
        match cached.ownership {
            Ownership::Live { ref mut strong } if *strong > 1 => {
                *strong -= 1;
                None
            }
            Ownership::Live { .. } => self.notify_released(key),
            Ownership::Tracked { .. } => None,
        }
    }

    fn notify_released(&mut self, key: FontKey) -> Option<Rc<Font>> {
        if self.shutting_down {
            return self.notify_expired(key);
        }
        let generation = self.tracker.add(key);
        let cached = self.fonts.get_mut(key)?;
        cached.ownership = Ownership::Tracked { generation };
        None
    }

    fn notify_expired(&mut self, key: FontKey) -> Option<Rc<Font>> {
        let cached = self.fonts.remove(key)?;
        if self.lookup.get(&cached.lookup_key) == Some(&key) {
            self.lookup.remove(&cached.lookup_key);
        }
        if let Ownership::Tracked { generation } = cached.ownership {
            self.tracker.remove(key, generation);
        }
        tracing::debug!("Font '{}' expired from cache", cached.font.name());
        Some(cached.font)
    }
}

/// Process-wide font instance cache
///
/// Cloning the cache clones the handle; all clones share one table. Call
/// [`shutdown`](Self::shutdown) when the layout session ends.
#[derive(Debug, Clone)]
pub struct FontCache {
    state: Rc<RefCell<CacheState>>,
}

impl Default for FontCache {
    fn default() -> Self {
        Self::new(&TextConfig::default())
    }
}

impl FontCache {
    pub fn new(config: &TextConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(CacheState {
                fonts: SlotMap::with_key(),
                lookup: FxHashMap::default(),
                tracker: ExpirationTracker::new(),
                font_timer: Timer::new(Duration::from_secs(config.font_expiration_secs)),
                word_timer: Timer::new(Duration::from_secs(config.word_expiration_secs)),
                word_max_age: config.word_max_age,
                shutting_down: false,
            })),
        }
    }

    fn lookup_key(entry: &Rc<FontEntry>, style: &FontStyle) -> LookupKey {
        (Rc::as_ptr(entry) as usize, style.clone())
    }

    fn handle(&self, key: FontKey, font: Rc<Font>) -> FontRef {
        FontRef {
            font,
            key,
            cache: Rc::downgrade(&self.state),
        }
    }

    /// Returns the cached font for `(entry, style)`, if any. Never creates.
    pub fn lookup(&self, entry: &Rc<FontEntry>, style: &FontStyle) -> Option<FontRef> {
        let mut state = self.state.borrow_mut();
        let key = *state.lookup.get(&Self::lookup_key(entry, style))?;
        let font = Rc::clone(&state.fonts.get(key)?.font);
        state.acquire(key);
        drop(state);
        Some(self.handle(key, font))
    }

    /// Registers a newly built font, replacing any previous registration for
    /// the same entry and style. An unreferenced previous font is dropped now;
    /// a referenced one stays alive but can no longer be looked up.
    pub fn add_new(&self, font: Font) -> FontRef {
        let font = Rc::new(font);
        let lookup_key = Self::lookup_key(font.entry(), font.style());
        let mut state = self.state.borrow_mut();
        let key = state.fonts.insert(CachedFont {
            font: Rc::clone(&font),
            lookup_key: lookup_key.clone(),
            ownership: Ownership::Live { strong: 1 },
        });
        let mut stale = None;
        if let Some(old) = state.lookup.insert(lookup_key, key) {
            tracing::debug!("Replaced cached font '{}' ({:?})", font.name(), old);
            let tracked = matches!(
                state.fonts.get(old).map(|c| c.ownership),
                Some(Ownership::Tracked { .. })
            );
            if tracked {
                stale = state.notify_expired(old);
            }
        }
        drop(state);
        drop(stale);
        self.handle(key, font)
    }

    /// Releases one strong reference. The last release moves the font into
    /// the expiration tracker.
    pub(crate) fn release(state: &RefCell<CacheState>, key: FontKey) {
        let expired = match state.try_borrow_mut() {
            Ok(mut state) => state.release(key),
            Err(_) => {
                tracing::warn!("Font cache busy while releasing {:?}", key);
                None
            }
        };
        drop(expired);
    }

    /// Tracks an unreferenced font for expiration.
    pub fn notify_released(&self, key: FontKey) {
        let expired = self.state.borrow_mut().notify_released(key);
        drop(expired);
    }

    /// Drops an expired font.
    pub fn notify_expired(&self, key: FontKey) {
        let expired = self.state.borrow_mut().notify_expired(key);
        drop(expired);
    }

    /// Advances the expiration tracker by one generation.
    pub fn age_one_generation(&self) {
        let mut state = self.state.borrow_mut();
        let keys = state.tracker.age_one_generation();
        let expired: Vec<Rc<Font>> = keys
            .into_iter()
            .filter_map(|key| state.notify_expired(key))
            .collect();
        drop(state);
        drop(expired);
    }

    /// Expires every unreferenced font.
    pub fn age_all_generations(&self) {
        let mut state = self.state.borrow_mut();
        let keys = state.tracker.age_all_generations();
        let expired: Vec<Rc<Font>> = keys
            .into_iter()
            .filter_map(|key| state.notify_expired(key))
            .collect();
        drop(state);
        drop(expired);
    }

    /// Forgets every lookup entry and expires all unreferenced fonts.
    pub fn flush(&self) {
        let count = {
            let mut state = self.state.borrow_mut();
            let count = state.lookup.len();
            state.lookup.clear();
            count
        };
        self.age_all_generations();
        tracing::debug!("Flushed font cache ({} lookup entries)", count);
    }

    /// Ages the shaped words of every cached font.
    pub fn age_cached_words(&self) {
        let fonts = self.fonts();
        let max_age = self.state.borrow().word_max_age;
        for font in &fonts {
            font.age_cached_words(max_age);
        }
    }

    /// Drops the shaped words of every cached font.
    pub fn flush_shaped_word_caches(&self) {
        for font in &self.fonts() {
            font.clear_cached_words();
        }
    }

    fn fonts(&self) -> Vec<Rc<Font>> {
        self.state
            .borrow()
            .fonts
            .values()
            .map(|c| Rc::clone(&c.font))
            .collect()
    }

    /// Runs whichever timers are due at `now`. The font-expiration and
    /// word-aging timers are independent.
    pub fn tick(&self, now: Instant) {
        let (font_ticks, word_ticks) = {
            let mut state = self.state.borrow_mut();
            (state.font_timer.poll(now), state.word_timer.poll(now))
        };
        for _ in 0..font_ticks {
            self.age_one_generation();
        }
        for _ in 0..word_ticks {
            self.age_cached_words();
        }
    }

    /// Fonts in the cache, live or tracked
    pub fn len(&self) -> usize {
        self.state.borrow().fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unreferenced fonts waiting to expire
    pub fn tracked_len(&self) -> usize {
        self.state.borrow().tracker.len()
    }

    pub fn memory_report(&self) -> FontCacheSizes {
        let mut sizes = FontCacheSizes::default();
        let state = self.state.borrow();
        sizes.fonts += state.fonts.capacity() * std::mem::size_of::<CachedFont>()
            + state.lookup.capacity() * std::mem::size_of::<(LookupKey, FontKey)>();
        for cached in state.fonts.values() {
            cached.font.add_size_of(&mut sizes);
        }
        sizes
    }

    /// Ends the session: drops every unreferenced font now, and makes fonts
    /// still referenced drop as soon as their last `FontRef` goes away.
    pub fn shutdown(&self) {
        self.state.borrow_mut().shutting_down = true;
        self.flush();
        tracing::debug!("Font cache shut down with {} live fonts", self.len());
    }
}

/// Strong handle to a cached font
pub struct FontRef {
    font: Rc<Font>,
    key: FontKey,
    cache: Weak<RefCell<CacheState>>,
}

impl FontRef {
    pub fn key(&self) -> FontKey {
        self.key
    }

    pub fn font(&self) -> &Rc<Font> {
        &self.font
    }

    pub fn ptr_eq(a: &FontRef, b: &FontRef) -> bool {
        Rc::ptr_eq(&a.font, &b.font)
    }
}

impl Clone for FontRef {
    fn clone(&self) -> Self {
        if let Some(state) = self.cache.upgrade() {
            match state.try_borrow_mut() {
                Ok(mut state) => state.acquire(self.key),
                Err(_) => tracing::warn!("Font cache busy while acquiring {:?}", self.key),
            }
        }
        Self {
            font: Rc::clone(&self.font),
            key: self.key,
            cache: self.cache.clone(),
        }
    }
}

impl Drop for FontRef {
    fn drop(&mut self) {
        if let Some(state) = self.cache.upgrade() {
            FontCache::release(&state, self.key);
        }
    }
}

impl Deref for FontRef {
    type Target = Font;

    fn deref(&self) -> &Font {
        &self.font
    }
}

impl fmt::Debug for FontRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontRef")
            .field("name", &self.font.name())
            .field("size", &self.font.adjusted_size())
            .field("key", &self.key)
            .finish()
    }
}
