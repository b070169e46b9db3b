//! Backend registry: identity → factory, with a lazily built singleton per
//! `(family, identity)`.
//!
//! ## Construction semantics
//!
//! - The first `resolve` for a key runs the factory; every later call gets
//!   a clone of the same `Arc` (pointer-equal).
//! - Concurrent first calls share one construction. The first caller
//!   installs a shared future in the slot; the rest await that same future
//!   and receive the same outcome, success or failure.
//! - A failed construction is not cached. The slot is cleared and the next
//!   `resolve` runs the factory again.
//!
//! The slot map lock is a plain `std::sync::Mutex` held only for map
//! operations, never across an `.await`. Each pending slot carries a
//! generation number so a slow waiter cannot overwrite a slot that was
//! cleared or re-registered while it was waiting.
//!
//! The `config` passed to `resolve` is only read by the construction that
//! populates the slot. A handle is keyed by identity alone.

use crate::backend::acquire::{AutoAcquirer, HttpAcquirer, LocalFileAcquirer, YtDlpAcquirer};
use crate::backend::synthesize::LlmSynthesizer;
use crate::backend::transcribe::WhisperApiTranscriber;
use crate::backend::{Acquirer, Synthesizer, Transcriber};
use crate::config::BackendConfig;
use crate::error::Video2MdError;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// The three interchangeable capability families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFamily {
    Acquirer,
    Transcriber,
    Synthesizer,
}

impl BackendFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquirer => "acquirer",
            Self::Transcriber => "transcriber",
            Self::Synthesizer => "synthesizer",
        }
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved backend of any family.
#[derive(Clone)]
pub enum BackendHandle {
    Acquirer(Arc<dyn Acquirer>),
    Transcriber(Arc<dyn Transcriber>),
    Synthesizer(Arc<dyn Synthesizer>),
}

impl BackendHandle {
    pub fn family(&self) -> BackendFamily {
        match self {
            Self::Acquirer(_) => BackendFamily::Acquirer,
            Self::Transcriber(_) => BackendFamily::Transcriber,
            Self::Synthesizer(_) => BackendFamily::Synthesizer,
        }
    }

    /// The backend's self-reported name.
    pub fn name(&self) -> &str {
        match self {
            Self::Acquirer(a) => a.name(),
            Self::Transcriber(t) => t.name(),
            Self::Synthesizer(s) => s.name(),
        }
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("family", &self.family())
            .field("name", &self.name())
            .finish()
    }
}

/// Async constructor for one backend identity.
pub type BackendFactory<T> =
    Arc<dyn Fn(BackendConfig) -> BoxFuture<'static, Result<Arc<T>, String>> + Send + Sync>;

type InitFuture<T> = Shared<BoxFuture<'static, Result<Arc<T>, String>>>;

enum Slot<T: ?Sized> {
    Ready(Arc<T>),
    Pending { generation: u64, init: InitFuture<T> },
}

/// Factories and cached handles for one family.
struct Family<T: ?Sized> {
    kind: BackendFamily,
    factories: RwLock<HashMap<String, BackendFactory<T>>>,
    slots: Mutex<HashMap<String, Slot<T>>>,
    next_generation: AtomicU64,
}

impl<T: ?Sized + Send + Sync + 'static> Family<T> {
    fn new(kind: BackendFamily) -> Self {
        Self {
            kind,
            factories: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, identity: String, factory: BackendFactory<T>) {
        // A re-registered identity must not keep serving the old instance.
        self.slots().remove(&identity);
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, factory);
    }

    fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn factory(&self, identity: &str) -> Result<BackendFactory<T>, Video2MdError> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories
            .get(identity)
            .cloned()
            .ok_or_else(|| {
                let mut available: Vec<&str> = factories.keys().map(String::as_str).collect();
                available.sort_unstable();
                Video2MdError::UnknownBackend {
                    family: self.kind,
                    identity: identity.to_string(),
                    available: if available.is_empty() {
                        "(none)".to_string()
                    } else {
                        available.join(", ")
                    },
                }
            })
    }

    fn is_cached(&self, identity: &str) -> bool {
        matches!(self.slots().get(identity), Some(Slot::Ready(_)))
    }

    fn clear(&self) {
        self.slots().clear();
    }

    async fn resolve(&self, identity: &str, config: &BackendConfig) -> Result<Arc<T>, Video2MdError> {
        let (generation, init) = {
            let mut slots = self.slots();
            match slots.get(identity) {
                Some(Slot::Ready(handle)) => return Ok(Arc::clone(handle)),
                Some(Slot::Pending { generation, init }) => {
                    debug!("{} '{}': waiting on construction in flight", self.kind, identity);
                    (*generation, init.clone())
                }
                None => {
                    let factory = self.factory(identity)?;
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let init = factory(config.clone()).shared();
                    slots.insert(
                        identity.to_string(),
                        Slot::Pending {
                            generation,
                            init: init.clone(),
                        },
                    );
                    info!("Constructing {} backend '{}'", self.kind, identity);
                    (generation, init)
                }
            }
        };

        let outcome = init.await;

        let mut slots = self.slots();
        let still_ours = matches!(
            slots.get(identity),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        match outcome {
            Ok(handle) => {
                if still_ours {
                    slots.insert(identity.to_string(), Slot::Ready(Arc::clone(&handle)));
                }
                Ok(handle)
            }
            Err(detail) => {
                if still_ours {
                    slots.remove(identity);
                    warn!("{} backend '{}' failed to initialise: {}", self.kind, identity, detail);
                }
                Err(Video2MdError::BackendInit {
                    family: self.kind,
                    identity: identity.to_string(),
                    detail,
                })
            }
        }
    }
}

/// Maps backend identities to factories and caches one handle per identity.
///
/// ```rust,no_run
/// use edgequake_video2md::{BackendConfig, BackendRegistry};
///
/// # async fn demo() -> Result<(), edgequake_video2md::Video2MdError> {
/// let registry = BackendRegistry::with_builtin();
/// let cfg = BackendConfig::new().with("base_url", "http://127.0.0.1:9000/v1");
/// let a = registry.transcriber("whisper-api", &cfg).await?;
/// let b = registry.transcriber("whisper-api", &cfg).await?;
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// # Ok(())
/// # }
/// ```
pub struct BackendRegistry {
    acquirers: Family<dyn Acquirer>,
    transcribers: Family<dyn Transcriber>,
    synthesizers: Family<dyn Synthesizer>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            acquirers: Family::new(BackendFamily::Acquirer),
            transcribers: Family::new(BackendFamily::Transcriber),
            synthesizers: Family::new(BackendFamily::Synthesizer),
        }
    }

    /// A registry with every built-in backend registered.
    ///
    /// | Family | Identities |
    /// |--------|------------|
    /// | acquirer | `local`, `http`, `yt-dlp`, `auto` |
    /// | transcriber | `whisper-api` |
    /// | synthesizer | `llm` |
    pub fn with_builtin() -> Self {
        let registry = Self::new();

        registry.register_acquirer("local", |_cfg| async { Ok(LocalFileAcquirer) });
        registry.register_acquirer("http", |cfg| async move { HttpAcquirer::from_config(&cfg) });
        registry.register_acquirer("yt-dlp", |cfg| async move {
            Ok(YtDlpAcquirer::from_config(&cfg))
        });
        registry.register_acquirer("auto", |cfg| async move { AutoAcquirer::from_config(&cfg) });

        registry.register_transcriber("whisper-api", |cfg| async move {
            WhisperApiTranscriber::from_config(&cfg)
        });

        registry.register_synthesizer("llm", |cfg| async move { LlmSynthesizer::from_config(&cfg) });

        registry
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Register (or replace) an acquirer factory.
    pub fn register_acquirer<F, Fut, A>(&self, identity: impl Into<String>, factory: F)
    where
        F: Fn(BackendConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, String>> + Send + 'static,
        A: Acquirer + 'static,
    {
        let factory: BackendFactory<dyn Acquirer> = Arc::new(move |cfg| {
            let fut = factory(cfg);
            async move { fut.await.map(|a| Arc::new(a) as Arc<dyn Acquirer>) }.boxed()
        });
        self.acquirers.register(identity.into(), factory);
    }

    /// Register (or replace) a transcriber factory.
    pub fn register_transcriber<F, Fut, T>(&self, identity: impl Into<String>, factory: F)
    where
        F: Fn(BackendConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
        T: Transcriber + 'static,
    {
        let factory: BackendFactory<dyn Transcriber> = Arc::new(move |cfg| {
            let fut = factory(cfg);
            async move { fut.await.map(|t| Arc::new(t) as Arc<dyn Transcriber>) }.boxed()
        });
        self.transcribers.register(identity.into(), factory);
    }

    /// Register (or replace) a synthesizer factory.
    pub fn register_synthesizer<F, Fut, S>(&self, identity: impl Into<String>, factory: F)
    where
        F: Fn(BackendConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, String>> + Send + 'static,
        S: Synthesizer + 'static,
    {
        let factory: BackendFactory<dyn Synthesizer> = Arc::new(move |cfg| {
            let fut = factory(cfg);
            async move { fut.await.map(|s| Arc::new(s) as Arc<dyn Synthesizer>) }.boxed()
        });
        self.synthesizers.register(identity.into(), factory);
    }

    // ── Resolution ───────────────────────────────────────────────────────

    pub async fn acquirer(
        &self,
        identity: &str,
        config: &BackendConfig,
    ) -> Result<Arc<dyn Acquirer>, Video2MdError> {
        self.acquirers.resolve(identity, config).await
    }

    pub async fn transcriber(
        &self,
        identity: &str,
        config: &BackendConfig,
    ) -> Result<Arc<dyn Transcriber>, Video2MdError> {
        self.transcribers.resolve(identity, config).await
    }

    pub async fn synthesizer(
        &self,
        identity: &str,
        config: &BackendConfig,
    ) -> Result<Arc<dyn Synthesizer>, Video2MdError> {
        self.synthesizers.resolve(identity, config).await
    }

    /// Family-generic form of the three typed resolvers.
    pub async fn resolve(
        &self,
        family: BackendFamily,
        identity: &str,
        config: &BackendConfig,
    ) -> Result<BackendHandle, Video2MdError> {
        Ok(match family {
            BackendFamily::Acquirer => BackendHandle::Acquirer(self.acquirer(identity, config).await?),
            BackendFamily::Transcriber => {
                BackendHandle::Transcriber(self.transcriber(identity, config).await?)
            }
            BackendFamily::Synthesizer => {
                BackendHandle::Synthesizer(self.synthesizer(identity, config).await?)
            }
        })
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Registered identities for a family, sorted.
    pub fn identities(&self, family: BackendFamily) -> Vec<String> {
        match family {
            BackendFamily::Acquirer => self.acquirers.identities(),
            BackendFamily::Transcriber => self.transcribers.identities(),
            BackendFamily::Synthesizer => self.synthesizers.identities(),
        }
    }

    /// Whether a constructed handle is cached for this key.
    pub fn is_cached(&self, family: BackendFamily, identity: &str) -> bool {
        match family {
            BackendFamily::Acquirer => self.acquirers.is_cached(identity),
            BackendFamily::Transcriber => self.transcribers.is_cached(identity),
            BackendFamily::Synthesizer => self.synthesizers.is_cached(identity),
        }
    }

    /// Drop every cached handle. Factories stay registered.
    pub fn clear(&self) {
        self.acquirers.clear();
        self.transcribers.clear();
        self.synthesizers.clear();
    }
}
