//! Single-owner translation worker
//!
//! The backend lives on one OS thread and pulls jobs off a queue, so calls are
//! strictly serialised no matter how many connections submit work at once.
//! Blocking inference or blocking HTTP never runs on the async runtime.
//!
//! A job whose requester has gone away (for example the connection closed
//! mid-translation) still runs to completion; its reply is simply dropped.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};

use super::{TranslationJob, Translator};
use crate::context::ContextPair;
use crate::error::{Result, ServerError};

/// Static facts about the backend, captured when the worker starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub model: String,
    pub device: String,
    pub supported_languages: BTreeMap<String, String>,
}

struct Job {
    job: TranslationJob,
    context: Option<Vec<ContextPair>>,
    reply: oneshot::Sender<Result<String>>,
}

/// Cloneable async front for the translator worker thread
#[derive(Clone)]
pub struct TranslatorHandle {
    jobs: mpsc::UnboundedSender<Job>,
    ready: Arc<AtomicBool>,
    info: Arc<BackendInfo>,
}

impl TranslatorHandle {
    /// Start the worker thread. `factory` runs on that thread, so backends that
    /// must not be created or dropped inside an async runtime are safe here.
    /// Blocks until the backend has been constructed.
    pub fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn Translator>> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = std::sync::mpsc::sync_channel(1);
        let ready = Arc::new(AtomicBool::new(false));
        let worker_ready = Arc::clone(&ready);

        thread::Builder::new()
            .name("translator-worker".to_string())
            .spawn(move || {
                let translator = match factory() {
                    Ok(translator) => translator,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                let info = BackendInfo {
                    model: translator.model_name(),
                    device: translator.device(),
                    supported_languages: translator.supported_languages(),
                };
                worker_ready.store(translator.is_ready(), Ordering::SeqCst);
                if init_tx.send(Ok(info)).is_err() {
                    return;
                }

                run_worker(translator, jobs_rx, worker_ready);
            })?;

        let info = init_rx
            .recv()
            .map_err(|_| ServerError::BackendUnavailable)??;

        tracing::info!(
            model = %info.model,
            device = %info.device,
            "Translator worker started"
        );

        Ok(Self {
            jobs: jobs_tx,
            ready,
            info: Arc::new(info),
        })
    }

    /// Plain translation
    pub async fn translate(&self, job: TranslationJob) -> Result<String> {
        self.submit(job, None).await
    }

    /// Translation with a speaker's recent history
    pub async fn translate_with_context(
        &self,
        job: TranslationJob,
        context: Vec<ContextPair>,
    ) -> Result<String> {
        self.submit(job, Some(context)).await
    }

    async fn submit(&self, job: TranslationJob, context: Option<Vec<ContextPair>>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job { job, context, reply })
            .map_err(|_| ServerError::BackendUnavailable)?;
        rx.await.map_err(|_| ServerError::BackendUnavailable)?
    }

    pub fn is_ready(&self) -> bool {
        !self.jobs.is_closed() && self.ready.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> &BackendInfo {
        &self.info
    }
}

fn run_worker(
    mut translator: Box<dyn Translator>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    ready: Arc<AtomicBool>,
) {
    while let Some(Job { job, context, reply }) = jobs.blocking_recv() {
        let outcome = catch_unwind(AssertUnwindSafe(|| match &context {
            Some(context) => translator.translate_with_context(&job, context),
            None => translator.translate(&job),
        }));

        let result = outcome.unwrap_or_else(|_| {
            tracing::error!("Translator backend panicked");
            Err(ServerError::backend("translator backend panicked"))
        });
        ready.store(translator.is_ready(), Ordering::SeqCst);

        if reply.send(result).is_err() {
            tracing::debug!("Translation finished after its requester went away");
        }
    }

    ready.store(false, Ordering::SeqCst);
    tracing::info!("Translator worker stopped");
}
