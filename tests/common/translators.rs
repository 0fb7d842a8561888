//! Scripted translation backends

use std::sync::mpsc as std_mpsc;

use tokio::sync::mpsc;

use context_translator::{ContextPair, Result, TranslationJob, Translator};

/// Prefixes the target language so results are distinguishable from input
pub struct PrefixTranslator;

impl Translator for PrefixTranslator {
    fn translate(&mut self, job: &TranslationJob) -> Result<String> {
        Ok(format!("[{}] {}", job.target_lang, job.text))
    }

    fn translate_with_context(
        &mut self,
        job: &TranslationJob,
        context: &[ContextPair],
    ) -> Result<String> {
        Ok(format!("[{} +{}] {}", job.target_lang, context.len(), job.text))
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn model_name(&self) -> String {
        "prefix".to_string()
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }
}

/// Blocks every call until the test releases it
pub struct GatedTranslator {
    gate: std_mpsc::Receiver<()>,
    started: mpsc::UnboundedSender<String>,
}

/// Test side of a [`GatedTranslator`]
pub struct Gate {
    release: std_mpsc::Sender<()>,
    started: mpsc::UnboundedReceiver<String>,
}

impl GatedTranslator {
    pub fn new() -> (Self, Gate) {
        let (release, gate) = std_mpsc::channel();
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        (
            Self {
                gate,
                started: started_tx,
            },
            Gate {
                release,
                started: started_rx,
            },
        )
    }
}

impl Gate {
    /// Wait until the backend has begun translating, returns the text
    pub async fn started(&mut self) -> String {
        self.started.recv().await.expect("Translator worker is gone")
    }

    /// Let one pending call finish
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

impl Translator for GatedTranslator {
    fn translate(&mut self, job: &TranslationJob) -> Result<String> {
        let _ = self.started.send(job.text.clone());
        let _ = self.gate.recv();
        Ok(format!("gated: {}", job.text))
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn model_name(&self) -> String {
        "gated".to_string()
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }
}
