//! Translation backend seam
//!
//! A [`Translator`] is the component that actually turns text in one language
//! into another. The server never calls it directly: it is moved onto a
//! dedicated worker thread (see [`worker`]) and every request is queued to
//! that thread, so a backend may keep mutable per-call state without any
//! locking of its own.

pub mod backend;
pub mod worker;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::context::ContextPair;
use crate::error::Result;

pub use backend::{EchoTranslator, HttpTranslator};
pub use worker::{BackendInfo, TranslatorHandle};

/// Parameters of a single translation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationJob {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub max_length: usize,
}

/// A translation backend
pub trait Translator: Send {
    /// Translate `job.text` without any history
    fn translate(&mut self, job: &TranslationJob) -> Result<String>;

    /// Translate `job.text` with the speaker's recent exchanges, oldest first.
    /// Backends without context support fall back to a plain translation.
    fn translate_with_context(
        &mut self,
        job: &TranslationJob,
        context: &[ContextPair],
    ) -> Result<String> {
        let _ = context;
        self.translate(job)
    }

    fn is_ready(&self) -> bool;

    /// Model identity reported to clients
    fn model_name(&self) -> String;

    /// Device identity reported to clients
    fn device(&self) -> String;

    /// Display name -> language code
    fn supported_languages(&self) -> BTreeMap<String, String> {
        SUPPORTED_LANGUAGES.clone()
    }
}

/// Languages offered to clients by default (display name -> FLORES-200 code)
pub static SUPPORTED_LANGUAGES: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    [
        ("Japanese", "jpn_Jpan"),
        ("English", "eng_Latn"),
        ("Chinese (Simplified)", "zho_Hans"),
        ("Chinese (Traditional)", "zho_Hant"),
        ("Korean", "kor_Hang"),
        ("French", "fra_Latn"),
        ("German", "deu_Latn"),
        ("Spanish", "spa_Latn"),
        ("Italian", "ita_Latn"),
        ("Russian", "rus_Cyrl"),
        ("Arabic", "arb_Arab"),
        ("Hindi", "hin_Deva"),
        ("Thai", "tha_Thai"),
        ("Vietnamese", "vie_Latn"),
    ]
    .into_iter()
    .map(|(name, code)| (name.to_string(), code.to_string()))
    .collect()
});
