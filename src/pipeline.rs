//! The derivative pipeline: injected ports plus configuration.
//!
//! A [`Pipeline`] owns everything a conversion needs (storage, record
//! store, encode engine, config, optional extension points) and the
//! [`TaskTracker`] that deferred work is spawned on. Hooks and the
//! regenerator hold it behind an `Arc`.
//!
//! The conversion logic itself lives in [`convert`](crate::convert) (one
//! derivative) and [`variants`](crate::variants) (primary + sizes).

use crate::config::{CollectionConfig, Config, SizeSpec, default_resize};
use crate::convert::DerivativeResult;
use crate::imaging::{EncodeEngine, ResizeSpec};
use crate::records::RecordStore;
use crate::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Maps a configured size to resize options, replacing [`default_resize`].
pub type ResizeFactory = Arc<dyn Fn(&SizeSpec) -> ResizeSpec + Send + Sync>;

/// Best-effort callback receiving a finished derivative.
pub type Observer = Arc<dyn Fn(&DerivativeResult) + Send + Sync>;

pub struct Pipeline<S, R, E> {
    pub(crate) storage: S,
    pub(crate) records: R,
    pub(crate) engine: Arc<E>,
    pub(crate) config: Arc<Config>,
    pub(crate) resize_factory: Option<ResizeFactory>,
    pub(crate) after_conversion: Option<Observer>,
    pub(crate) after_storage: Option<Observer>,
    tasks: TaskTracker,
}

impl<S: Storage, R: RecordStore, E: EncodeEngine + 'static> Pipeline<S, R, E> {
    pub fn new(storage: S, records: R, engine: E, config: Config) -> Self {
        Self {
            storage,
            records,
            engine: Arc::new(engine),
            config: Arc::new(config),
            resize_factory: None,
            after_conversion: None,
            after_storage: None,
            tasks: TaskTracker::new(),
        }
    }

    /// Override how size specs become resize options.
    pub fn with_resize_factory(
        mut self,
        factory: impl Fn(&SizeSpec) -> ResizeSpec + Send + Sync + 'static,
    ) -> Self {
        self.resize_factory = Some(Arc::new(factory));
        self
    }

    /// Called with every encoded derivative, before it is written.
    pub fn with_after_conversion(
        mut self,
        observer: impl Fn(&DerivativeResult) + Send + Sync + 'static,
    ) -> Self {
        self.after_conversion = Some(Arc::new(observer));
        self
    }

    /// Called with every derivative after a successful write.
    pub fn with_after_storage(
        mut self,
        observer: impl Fn(&DerivativeResult) + Send + Sync + 'static,
    ) -> Self {
        self.after_storage = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub fn collection(&self, slug: &str) -> Option<&CollectionConfig> {
        self.config.collection(slug)
    }

    pub fn static_dir(&self, collection: &CollectionConfig) -> PathBuf {
        self.config.static_dir(collection)
    }

    pub(crate) fn resize_for(&self, size: &SizeSpec) -> ResizeSpec {
        match &self.resize_factory {
            Some(factory) => factory(size),
            None => default_resize(size),
        }
    }

    /// Run a future in the background, tracked for [`wait_idle`](Self::wait_idle).
    ///
    /// The task keeps running if the handle is dropped.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(future)
    }

    /// Number of background tasks still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every background task, including ones spawned while
    /// waiting, has finished.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
