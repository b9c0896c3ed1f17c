//! Process-wide lazily loaded models.
//!
//! Each model kind lives in its own [`ModelSlot`]. The first caller starts the
//! loader on a detached task and every caller, including later ones, waits on
//! the same cell, so a kind is constructed at most once even if the request
//! that started the load goes away. A failed load leaves the slot empty and
//! the next request tries again. After a successful load, readers only clone
//! an `Arc`.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use candle_core::Device;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::classification::ClassifierHandle;
use crate::config::{Args, GenerationConfig};
use crate::conversation::ChatPipeline;
use crate::device::device_info;
use crate::error::{InferenceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    ImageClassifier,
    ConversationalGenerator,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::ImageClassifier => "image-classifier",
            ModelKind::ConversationalGenerator => "conversational-generator",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a model on the given device. Runs on the blocking pool.
pub type Loader<T> = Arc<dyn Fn(&Device) -> Result<T> + Send + Sync>;

pub struct ModelSlot<T> {
    kind: ModelKind,
    cell: Arc<OnceCell<Arc<T>>>,
    loader: Loader<T>,
}

impl<T: Send + Sync + 'static> ModelSlot<T> {
    pub fn new(kind: ModelKind, loader: Loader<T>) -> Self {
        Self {
            kind,
            cell: Arc::new(OnceCell::new()),
            loader,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// The resident handle, if any. Never triggers a load.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get_or_load(&self, device: &Device) -> Result<Arc<T>> {
        if let Some(handle) = self.cell.get() {
            return Ok(Arc::clone(handle));
        }

        let kind = self.kind;
        let cell = Arc::clone(&self.cell);
        let loader = Arc::clone(&self.loader);
        let device = device.clone();

        // The init runs on its own task: dropping this future leaves it running.
        tokio::spawn(async move {
            let handle = cell.get_or_try_init(|| load(kind, loader, device)).await?;
            Ok::<_, InferenceError>(Arc::clone(handle))
        })
        .await
        .map_err(|e| InferenceError::ModelLoad(format!("{} load task failed: {}", kind, e)))?
    }
}

async fn load<T>(kind: ModelKind, loader: Loader<T>, device: Device) -> Result<Arc<T>>
where
    T: Send + Sync + 'static,
{
    info!("Loading {} on {}", kind, device_info(&device));

    let start = Instant::now();
    match run_blocking(move || loader(&device)).await {
        Ok(model) => {
            info!("{} ready in {:?}", kind, start.elapsed());
            Ok(Arc::new(model))
        }
        Err(e) => {
            error!("Failed to load {}: {}", kind, e);
            Err(e)
        }
    }
}

/// Run CPU-bound model work off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| InferenceError::Inference(format!("worker task failed: {}", e)))?
}

/// A resident model of either kind.
#[derive(Clone)]
pub enum ModelHandle {
    Classifier(Arc<ClassifierHandle>),
    Chat(Arc<ChatPipeline>),
}

impl ModelHandle {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelHandle::Classifier(_) => ModelKind::ImageClassifier,
            ModelHandle::Chat(_) => ModelKind::ConversationalGenerator,
        }
    }
}

pub struct ModelRegistry {
    device: Device,
    classifier: ModelSlot<ClassifierHandle>,
    chat: ModelSlot<ChatPipeline>,
}

impl ModelRegistry {
    pub fn new(
        device: Device,
        classifier: Loader<ClassifierHandle>,
        chat: Loader<ChatPipeline>,
    ) -> Self {
        Self {
            device,
            classifier: ModelSlot::new(ModelKind::ImageClassifier, classifier),
            chat: ModelSlot::new(ModelKind::ConversationalGenerator, chat),
        }
    }

    /// Registry backed by the hub sources named in `args`.
    pub fn from_args(args: &Args, device: Device) -> Self {
        let classifier_source = args.classifier_source();
        let chat_source = args.chat_source();
        let generation = GenerationConfig::from(args);

        Self::new(
            device,
            Arc::new(move |device: &Device| ClassifierHandle::load(&classifier_source, device)),
            Arc::new(move |device: &Device| {
                ChatPipeline::load(&chat_source, generation.clone(), device)
            }),
        )
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub async fn classifier(&self) -> Result<Arc<ClassifierHandle>> {
        self.classifier.get_or_load(&self.device).await
    }

    pub async fn chat(&self) -> Result<Arc<ChatPipeline>> {
        self.chat.get_or_load(&self.device).await
    }

    pub async fn get_or_load(&self, kind: ModelKind) -> Result<ModelHandle> {
        match kind {
            ModelKind::ImageClassifier => self.classifier().await.map(ModelHandle::Classifier),
            ModelKind::ConversationalGenerator => self.chat().await.map(ModelHandle::Chat),
        }
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::ImageClassifier => self.classifier.is_loaded(),
            ModelKind::ConversationalGenerator => self.chat.is_loaded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn counting_loader(calls: Arc<AtomicUsize>, fail_first: usize) -> Loader<String> {
        slow_loader(calls, fail_first, Duration::from_millis(20))
    }

    fn slow_loader(calls: Arc<AtomicUsize>, fail_first: usize, delay: Duration) -> Loader<String> {
        Arc::new(move |_device: &Device| -> Result<String> {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(delay);
            if call < fail_first {
                Err(InferenceError::Hub("source unreachable".into()))
            } else {
                Ok(format!("model #{}", call))
            }
        })
    }

    #[tokio::test]
    async fn loads_once_and_reuses_the_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = ModelSlot::new(ModelKind::ImageClassifier, counting_loader(calls.clone(), 0));

        assert!(!slot.is_loaded());
        let first = slot.get_or_load(&Device::Cpu).await.unwrap();
        let second = slot.get_or_load(&Device::Cpu).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.is_loaded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_requests_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(ModelSlot::new(
            ModelKind::ConversationalGenerator,
            counting_loader(calls.clone(), 0),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.get_or_load(&Device::Cpu).await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn failed_load_leaves_slot_empty_for_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = ModelSlot::new(ModelKind::ImageClassifier, counting_loader(calls.clone(), 1));

        let err = slot.get_or_load(&Device::Cpu).await.unwrap_err();
        assert!(matches!(err, InferenceError::Hub(_)));
        assert!(!slot.is_loaded());
        assert!(slot.get().is_none());

        let handle = slot.get_or_load(&Device::Cpu).await.unwrap();
        assert_eq!(handle.as_str(), "model #1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_restart_the_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = ModelSlot::new(
            ModelKind::ConversationalGenerator,
            slow_loader(calls.clone(), 0, Duration::from_millis(300)),
        );

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), slot.get_or_load(&Device::Cpu)).await;
        assert!(abandoned.is_err());
        assert!(!slot.is_loaded());

        let handle = slot.get_or_load(&Device::Cpu).await.unwrap();
        assert_eq!(handle.as_str(), "model #0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_finishes_after_its_caller_is_gone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = ModelSlot::new(
            ModelKind::ImageClassifier,
            slow_loader(calls.clone(), 0, Duration::from_millis(100)),
        );

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), slot.get_or_load(&Device::Cpu)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(slot.is_loaded());
        assert_eq!(slot.get().unwrap().as_str(), "model #0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registry_loads_each_kind_independently() {
        let registry = ModelRegistry::new(
            Device::Cpu,
            Arc::new(|_: &Device| -> Result<ClassifierHandle> {
                Ok(crate::classification::tests::tiny_handle(vec![0.0; 7]))
            }),
            Arc::new(|_: &Device| -> Result<ChatPipeline> {
                Ok(crate::conversation::tests::scripted_pipeline(vec![1]))
            }),
        );

        let handle = registry.get_or_load(ModelKind::ImageClassifier).await.unwrap();
        assert_eq!(handle.kind(), ModelKind::ImageClassifier);
        assert!(registry.is_loaded(ModelKind::ImageClassifier));
        assert!(!registry.is_loaded(ModelKind::ConversationalGenerator));

        let handle = registry
            .get_or_load(ModelKind::ConversationalGenerator)
            .await
            .unwrap();
        assert_eq!(handle.kind(), ModelKind::ConversationalGenerator);
        assert!(registry.is_loaded(ModelKind::ConversationalGenerator));
    }

    #[test]
    fn kinds_have_stable_names() {
        assert_eq!(ModelKind::ImageClassifier.to_string(), "image-classifier");
        assert_eq!(
            ModelKind::ConversationalGenerator.to_string(),
            "conversational-generator"
        );
    }
}
