// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller runtime: watches, the shared work queue, and the worker pool.
//!
//! Five informers feed one [`WorkQueue`]:
//!
//! | Watched kind                  | Space | Work item                    |
//! |-------------------------------|-------|------------------------------|
//! | `Binding`                     | WDS   | [`WorkItem::Binding`]        |
//! | `CustomTransform`             | WDS   | [`WorkItem::Transform`]      |
//! | inventory entries             | ITS   | [`WorkItem::Properties`]     |
//! | property `ConfigMap`s         | ITS   | [`WorkItem::Properties`]     |
//! | wrapped objects (by label)    | ITS   | [`WorkItem::Binding`]        |
//!
//! Workers start only after every store has finished its initial listing, so that the
//! caches never see a partial view of the cluster.

use crate::constants::{
    INVENTORY_GROUP, INVENTORY_KIND, INVENTORY_RESOURCE, INVENTORY_VERSION, ORIGIN_BINDING_LABEL,
    ORIGIN_WDS_LABEL, PROPERTY_NAMESPACE_RETRY_SECS,
};
use crate::context::{
    Context, KubeBindings, KubeTransformStatus, KubeWorkloadSource, KubeWrappedObjects, Stores,
};
use crate::crd::{Binding, CustomTransform};
use crate::customize::Customizer;
use crate::errors::{is_conflict, Error, Result};
use crate::properties::PropertyTracker;
use crate::reconcilers::BindingReconciler;
use crate::sharder::Sharder;
use crate::transform_cache::CustomTransformCache;
use crate::transport::Transport;
use crate::workqueue::{binding_enqueuer, WorkItem, WorkQueue};
use futures::{Stream, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ObjectMeta, PostParams};
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings of one controller process.
#[derive(Clone)]
pub struct ControllerConfig {
    /// Name of the workload description space this controller serves
    pub wds_name: String,
    /// Max serialized size of the objects in one wrapped object
    pub max_size_wrapped: usize,
    /// Max number of objects in one wrapped object
    pub max_num_wrapped: usize,
    /// Number of concurrent workers
    pub workers: usize,
    /// Namespace, in the ITS, holding per-destination property `ConfigMap`s
    pub property_namespace: String,
    pub transport: Arc<dyn Transport>,
}

/// The API resource of inventory entries.
#[must_use]
pub fn inventory_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(INVENTORY_GROUP, INVENTORY_VERSION, INVENTORY_KIND),
        INVENTORY_RESOURCE,
    )
}

/// The object a watch event touched. Deletions count: a deleted `CustomTransform` or
/// property record must still trigger its work item.
fn touched_object<K>(event: &watcher::Event<K>) -> Option<&K> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) | watcher::Event::Delete(obj) => {
            Some(obj)
        }
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Work item for a change to a wrapped object: the Binding named by its origin label, if the
/// object belongs to this WDS.
#[must_use]
pub fn binding_item_for_wrapped(object: &DynamicObject, wds_name: &str) -> Option<WorkItem> {
    let labels = object.labels();
    if labels.get(ORIGIN_WDS_LABEL).map(String::as_str) != Some(wds_name) {
        return None;
    }
    labels
        .get(ORIGIN_BINDING_LABEL)
        .map(|name| WorkItem::Binding(name.clone()))
}

/// Runs a reflector for `api` into `writer` until cancelled, enqueueing `to_item` of every
/// touched object.
fn spawn_watch<K, F>(
    kind: &'static str,
    api: Api<K>,
    config: watcher::Config,
    writer: Writer<K>,
    queue: Arc<WorkQueue<WorkItem>>,
    to_item: F,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
    F: Fn(&K) -> Option<WorkItem> + Send + 'static,
{
    let events = reflector::reflector(writer, watcher(api, config)).default_backoff();
    spawn_event_loop(kind, events, queue, to_item, cancel)
}

/// Like [`spawn_watch`] but without a store, for kinds that only trigger work.
fn spawn_trigger_watch<K, F>(
    kind: &'static str,
    api: Api<K>,
    config: watcher::Config,
    queue: Arc<WorkQueue<WorkItem>>,
    to_item: F,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(&K) -> Option<WorkItem> + Send + 'static,
{
    let events = watcher(api, config).default_backoff();
    spawn_event_loop(kind, events, queue, to_item, cancel)
}

fn spawn_event_loop<K, S, F>(
    kind: &'static str,
    events: S,
    queue: Arc<WorkQueue<WorkItem>>,
    to_item: F,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: Send + 'static,
    S: Stream<Item = watcher::Result<watcher::Event<K>>> + Send + 'static,
    F: Fn(&K) -> Option<WorkItem> + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = Box::pin(events);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.try_next() => match next {
                    Ok(Some(event)) => {
                        if let Some(item) = touched_object(&event).and_then(&to_item) {
                            queue.add(item);
                        }
                    }
                    Ok(None) => {
                        warn!(kind, "Watch stream ended");
                        break;
                    }
                    Err(e) => error!(kind, error = %e, "Watch failed, retrying with backoff"),
                }
            }
        }
        debug!(kind, "Watch stopped");
    })
}

/// Waits until every store has its initial listing.
async fn wait_for_stores(stores: &Stores) -> Result<()> {
    async fn ready<K>(kind: &str, store: &Store<K>) -> Result<()>
    where
        K: Resource + Clone + 'static,
        K::DynamicType: Eq + Hash + Clone,
    {
        store
            .wait_until_ready()
            .await
            .map_err(|_| Error::CacheSync(kind.to_string()))?;
        debug!(kind, "Cache synced");
        Ok(())
    }

    ready("Binding", &stores.bindings).await?;
    ready("CustomTransform", &stores.custom_transforms).await?;
    ready(INVENTORY_KIND, &stores.inventory).await?;
    ready("ConfigMap", &stores.property_configmaps).await?;
    Ok(())
}

/// Creates the property namespace if missing, retrying until it succeeds or `cancel` fires.
/// Returns false if cancelled first.
pub async fn ensure_property_namespace(
    client: Client,
    namespace: &str,
    cancel: &CancellationToken,
) -> bool {
    let api: Api<Namespace> = Api::all(client);
    loop {
        match create_namespace_if_missing(&api, namespace).await {
            Ok(()) => return true,
            Err(e) => error!(
                namespace,
                error = %e,
                retry_secs = PROPERTY_NAMESPACE_RETRY_SECS,
                "Failed to ensure property namespace"
            ),
        }
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(Duration::from_secs(PROPERTY_NAMESPACE_RETRY_SECS)) => {}
        }
    }
}

async fn create_namespace_if_missing(api: &Api<Namespace>, namespace: &str) -> Result<()> {
    if api.get_opt(namespace).await?.is_some() {
        debug!(namespace, "Property namespace exists");
        return Ok(());
    }
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };
    match api.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            info!(namespace, "Created property namespace");
            Ok(())
        }
        Err(e) if is_conflict(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Does one work item.
async fn handle(reconciler: &BindingReconciler, item: &WorkItem) -> Result<()> {
    match item {
        WorkItem::Binding(name) => reconciler.reconcile(name).await,
        WorkItem::Transform(name) => {
            reconciler.transforms.sync_rule(name);
            Ok(())
        }
        WorkItem::Properties(name) => {
            reconciler.properties.recompute_if_changed(name);
            Ok(())
        }
    }
}

/// Applies the outcome of processing `item` to its backoff state.
///
/// Success resets the backoff. A retryable error re-queues the item with backoff. Any other
/// error is logged and the item dropped until a new event arrives.
pub fn settle(queue: &Arc<WorkQueue<WorkItem>>, item: &WorkItem, result: Result<()>) {
    match result {
        Ok(()) => queue.forget(item),
        Err(e) if e.is_retryable() => {
            warn!(
                item = %item,
                requeues = queue.num_requeues(item),
                error = %e,
                "Work item failed, will retry"
            );
            queue.add_rate_limited(item.clone());
        }
        Err(e) => {
            queue.forget(item);
            error!(item = %item, error = %e, "Work item failed, not retrying");
        }
    }
}

async fn run_worker(id: usize, queue: Arc<WorkQueue<WorkItem>>, reconciler: Arc<BindingReconciler>) {
    debug!(worker = id, "Worker started");
    while let Some(item) = queue.get().await {
        let result = handle(&reconciler, &item).await;
        settle(&queue, &item, result);
        queue.done(&item);
    }
    debug!(worker = id, "Worker stopped");
}

/// Runs the transport controller until `cancel` fires.
///
/// # Errors
///
/// Returns an error if a cache stops before its initial sync.
pub async fn run(
    wds_client: Client,
    its_client: Client,
    config: ControllerConfig,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        wds = %config.wds_name,
        transport = config.transport.name(),
        workers = config.workers,
        max_size_wrapped = config.max_size_wrapped,
        max_num_wrapped = config.max_num_wrapped,
        "Starting transport controller"
    );

    if !ensure_property_namespace(its_client.clone(), &config.property_namespace, &cancel).await {
        return Ok(());
    }

    let queue: Arc<WorkQueue<WorkItem>> = Arc::new(WorkQueue::new());

    let (bindings, bindings_writer) = reflector::store::<Binding>();
    let (custom_transforms, transforms_writer) = reflector::store::<CustomTransform>();
    let (property_configmaps, configmaps_writer) = reflector::store::<ConfigMap>();
    let inventory_ar = inventory_resource();
    let inventory_writer = Writer::<DynamicObject>::new(inventory_ar.clone());
    let inventory = inventory_writer.as_reader();
    let wrapped_ar = config.transport.wrapped_object_resource();

    let ctx = Context {
        wds_client: wds_client.clone(),
        its_client: its_client.clone(),
        stores: Stores {
            bindings,
            custom_transforms,
            inventory,
            property_configmaps,
            property_namespace: config.property_namespace.clone(),
        },
    };

    let mut watches = vec![
        spawn_watch(
            "Binding",
            Api::<Binding>::all(wds_client.clone()),
            watcher::Config::default(),
            bindings_writer,
            queue.clone(),
            |obj| Some(WorkItem::Binding(obj.name_any())),
            cancel.clone(),
        ),
        spawn_watch(
            "CustomTransform",
            Api::<CustomTransform>::all(wds_client.clone()),
            watcher::Config::default(),
            transforms_writer,
            queue.clone(),
            |obj| Some(WorkItem::Transform(obj.name_any())),
            cancel.clone(),
        ),
        spawn_watch(
            INVENTORY_KIND,
            Api::<DynamicObject>::all_with(its_client.clone(), &inventory_ar),
            watcher::Config::default(),
            inventory_writer,
            queue.clone(),
            |obj| Some(WorkItem::Properties(obj.name_any())),
            cancel.clone(),
        ),
        spawn_watch(
            "ConfigMap",
            Api::<ConfigMap>::namespaced(its_client.clone(), &config.property_namespace),
            watcher::Config::default(),
            configmaps_writer,
            queue.clone(),
            |obj| Some(WorkItem::Properties(obj.name_any())),
            cancel.clone(),
        ),
    ];
    let wds_name = config.wds_name.clone();
    watches.push(spawn_trigger_watch(
        "wrapped object",
        Api::<DynamicObject>::all_with(its_client.clone(), &wrapped_ar),
        watcher::Config::default().labels(&format!("{ORIGIN_WDS_LABEL}={wds_name}")),
        queue.clone(),
        move |obj| binding_item_for_wrapped(obj, &wds_name),
        cancel.clone(),
    ));

    tokio::select! {
        () = cancel.cancelled() => {
            queue.shut_down();
            return Ok(());
        }
        synced = wait_for_stores(&ctx.stores) => synced?,
    }
    info!("All caches synced, starting workers");

    let enqueue = binding_enqueuer(&queue);
    let stores = Arc::new(ctx.stores.clone());
    let reconciler = Arc::new(BindingReconciler {
        bindings: Arc::new(KubeBindings::new(&ctx)),
        workload: Arc::new(KubeWorkloadSource::new(&ctx)),
        wrapped: Arc::new(KubeWrappedObjects::new(&ctx, wrapped_ar)),
        transport: config.transport.clone(),
        transforms: Arc::new(CustomTransformCache::new(
            stores.clone(),
            Arc::new(KubeTransformStatus::new(&ctx)),
            enqueue.clone(),
        )),
        properties: Arc::new(PropertyTracker::new(stores, enqueue)),
        customizer: Customizer::new(),
        sharder: Sharder::new(
            config.transport.clone(),
            config.wds_name.clone(),
            config.max_size_wrapped,
            config.max_num_wrapped,
        ),
    });

    let workers: Vec<_> = (0..config.workers.max(1))
        .map(|id| tokio::spawn(run_worker(id, queue.clone(), reconciler.clone())))
        .collect();

    cancel.cancelled().await;
    info!("Shutting down transport controller");
    queue.shut_down();
    for handle in workers.into_iter().chain(watches) {
        if let Err(e) = handle.await {
            error!(error = %e, "Controller task panicked");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
