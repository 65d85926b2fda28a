//! BPE tokenizer with a scoped per-request handle
//!
//! The cl100k_base tables are built once per process on a blocking thread
//! and shared read-only afterwards. Each request takes a [`Tokenizer`]
//! lease on them; the lease is returned to the [`LeaseLedger`] exactly once,
//! either through [`Tokenizer::dispose`] or when the handle is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("failed to load vocabulary: {0}")]
    Load(String),

    #[error("vocabulary loader task failed: {0}")]
    Join(String),
}

impl From<TokenizerError> for chatproxy_core::Error {
    fn from(e: TokenizerError) -> Self {
        chatproxy_core::Error::Initialization(e.to_string())
    }
}

/// Text to token IDs. Pure and deterministic for a loaded vocabulary.
pub trait Encoder: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

struct Cl100k(CoreBPE);

impl Encoder for Cl100k {
    fn encode(&self, text: &str) -> Vec<u32> {
        // Special-token text is encoded as ordinary text, never rejected.
        self.0
            .encode_ordinary(text)
            .into_iter()
            .map(|rank| rank as u32)
            .collect()
    }
}

/// Source of a loaded vocabulary.
#[async_trait::async_trait]
pub trait VocabularyLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Encoder>, TokenizerError>;
}

/// Loads cl100k_base once and hands out the cached tables afterwards.
#[derive(Default)]
pub struct Cl100kLoader {
    cache: OnceCell<Arc<dyn Encoder>>,
}

impl Cl100kLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.initialized()
    }
}

#[async_trait::async_trait]
impl VocabularyLoader for Cl100kLoader {
    async fn load(&self) -> Result<Arc<dyn Encoder>, TokenizerError> {
        let encoder = self
            .cache
            .get_or_try_init(|| async {
                let started = std::time::Instant::now();
                let bpe = tokio::task::spawn_blocking(tiktoken_rs::cl100k_base)
                    .await
                    .map_err(|e| TokenizerError::Join(e.to_string()))?
                    .map_err(|e| TokenizerError::Load(e.to_string()))?;
                info!("Loaded cl100k_base vocabulary in {:?}", started.elapsed());
                Ok::<_, TokenizerError>(Arc::new(Cl100k(bpe)) as Arc<dyn Encoder>)
            })
            .await?;
        Ok(encoder.clone())
    }
}

#[derive(Default)]
struct LedgerCounts {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Counts tokenizer leases handed out and returned.
#[derive(Clone, Default)]
pub struct LeaseLedger {
    counts: Arc<LedgerCounts>,
}

impl LeaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> usize {
        self.counts.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counts.released.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    fn acquire(&self) {
        self.counts.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Per-request handle on a loaded vocabulary.
pub struct Tokenizer {
    encoder: Arc<dyn Encoder>,
    ledger: LeaseLedger,
}

impl Tokenizer {
    /// Wait for the vocabulary and take a lease on it.
    pub async fn load(
        loader: &dyn VocabularyLoader,
        ledger: &LeaseLedger,
    ) -> Result<Self, TokenizerError> {
        let encoder = loader.load().await?;
        ledger.acquire();
        debug!("Tokenizer lease acquired ({} outstanding)", ledger.outstanding());
        Ok(Self {
            encoder,
            ledger: ledger.clone(),
        })
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.encoder.encode(text)
    }

    pub fn count(&self, text: &str) -> usize {
        self.encoder.count(text)
    }

    /// Release the lease now rather than at end of scope.
    pub fn dispose(self) {}
}

impl Encoder for Tokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.encoder.encode(text)
    }

    fn count(&self, text: &str) -> usize {
        self.encoder.count(text)
    }
}

impl Drop for Tokenizer {
    fn drop(&mut self) {
        self.ledger.release();
        debug!("Tokenizer lease released ({} outstanding)", self.ledger.outstanding());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait::async_trait]
    impl VocabularyLoader for Failing {
        async fn load(&self) -> Result<Arc<dyn Encoder>, TokenizerError> {
            Err(TokenizerError::Load("asset missing".into()))
        }
    }

    #[tokio::test]
    async fn cl100k_encodes_known_text() {
        let loader = Cl100kLoader::new();
        let ledger = LeaseLedger::new();
        let tokenizer = Tokenizer::load(&loader, &ledger).await.unwrap();
        assert_eq!(tokenizer.count("Hello, world!"), 4);
        assert_eq!(tokenizer.count(""), 0);
        assert_eq!(tokenizer.encode("hello"), tokenizer.encode("hello"));
    }

    #[tokio::test]
    async fn cl100k_does_not_reject_special_token_text() {
        let loader = Cl100kLoader::new();
        let ledger = LeaseLedger::new();
        let tokenizer = Tokenizer::load(&loader, &ledger).await.unwrap();
        assert!(tokenizer.count("<|endoftext|>") > 1);
    }

    #[tokio::test]
    async fn vocabulary_is_cached_across_loads() {
        let loader = Cl100kLoader::new();
        assert!(!loader.is_loaded());
        let a = loader.load().await.unwrap();
        assert!(loader.is_loaded());
        let b = loader.load().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn lease_released_once_on_dispose() {
        let loader = Cl100kLoader::new();
        let ledger = LeaseLedger::new();
        let tokenizer = Tokenizer::load(&loader, &ledger).await.unwrap();
        assert_eq!(ledger.outstanding(), 1);
        tokenizer.dispose();
        assert_eq!(ledger.acquired(), 1);
        assert_eq!(ledger.released(), 1);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn lease_released_on_drop() {
        let loader = Cl100kLoader::new();
        let ledger = LeaseLedger::new();
        {
            let _tokenizer = Tokenizer::load(&loader, &ledger).await.unwrap();
            assert_eq!(ledger.outstanding(), 1);
        }
        assert_eq!(ledger.released(), 1);
    }

    #[tokio::test]
    async fn failed_load_takes_no_lease() {
        let ledger = LeaseLedger::new();
        let err = Tokenizer::load(&Failing, &ledger).await.err().unwrap();
        assert!(matches!(err, TokenizerError::Load(_)));
        assert_eq!(ledger.acquired(), 0);
        assert_eq!(ledger.released(), 0);
    }

    #[test]
    fn load_error_maps_to_initialization() {
        let err: chatproxy_core::Error = TokenizerError::Load("bad".into()).into();
        assert_eq!(err.kind(), chatproxy_core::ErrorKind::Initialization);
    }
}
