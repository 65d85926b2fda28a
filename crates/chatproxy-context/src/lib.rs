//! Chatproxy Context - BPE tokenizer and context window selection

pub mod tokenizer;
pub mod window;

pub use tokenizer::{
    Cl100kLoader, Encoder, LeaseLedger, Tokenizer, TokenizerError, VocabularyLoader,
};
pub use window::ContextWindow;
