//! Actor-system kernel
//!
//! Owns the local actor directory, the pending-reply registry, the
//! remote-node directory, and the connection managers. Outbound calls
//! resolve their target node, correlate on a fresh call id, and await the
//! matching reply; inbound calls dispatch to local actors and send the
//! result back on the originating connection.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::codec::{JsonCodec, WireCodec};
use crate::config::SystemConfig;
use crate::directory::RemoteNodeDirectory;
use crate::envelope::Envelope;
use crate::error::{ActorSystemError, Result};
use crate::identity::{ActorId, CallId, NodeId};
use crate::manager::{ClientManager, ConnectionMonitor, Manager, ServerAddress, ServerManager};
use crate::pending::ReplyRegistry;
use crate::remote::{current_remote, RemoteNode, CURRENT_REMOTE};

/// A distributed-addressable object hosted by one node.
///
/// The runtime routes calls to `receive_call`; the implementation decodes
/// the argument blobs with its own codec, runs the named method, and
/// returns the encoded result (an empty vec for void). The kernel does
/// not serialize calls per actor; an actor needing a mailbox discipline
/// enforces it internally.
#[async_trait]
pub trait Actor: Send + Sync + 'static {
    /// The identity this actor registered under.
    fn id(&self) -> &ActorId;

    /// Handle one inbound invocation.
    async fn receive_call(
        &self,
        target: &str,
        generic_subs: &[String],
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>>;

    /// Upcast for typed resolution. Implement as `{ self }`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Application-supplied fallback that maps an unknown local id to a newly
/// instantiated actor (server-side lazy construction).
pub type OnDemandResolver = Arc<dyn Fn(&ActorId) -> Option<Arc<dyn Actor>> + Send + Sync>;

#[derive(Default)]
struct ActorRegistry {
    actors: HashMap<ActorId, Arc<dyn Actor>>,
    resolver: Option<OnDemandResolver>,
}

/// Shared kernel state reachable from connection tasks.
pub(crate) struct SystemCore {
    pub(crate) node_id: NodeId,
    pub(crate) config: SystemConfig,
    pub(crate) codec: Arc<dyn WireCodec>,
    pub(crate) replies: ReplyRegistry,
    pub(crate) directory: RemoteNodeDirectory,
    registry: Mutex<ActorRegistry>,
}

impl SystemCore {
    pub(crate) fn new(config: SystemConfig, codec: Arc<dyn WireCodec>) -> Arc<Self> {
        Arc::new(Self {
            node_id: NodeId::random(),
            directory: RemoteNodeDirectory::new(config.connection_timeout),
            config,
            codec,
            replies: ReplyRegistry::new(),
            registry: Mutex::new(ActorRegistry::default()),
        })
    }

    /// Normalize an id for local-directory lookup: a missing node field
    /// refers to this node.
    fn local_key(&self, id: &ActorId) -> ActorId {
        if id.node.is_some() {
            id.clone()
        } else {
            id.clone().with_node(self.node_id)
        }
    }

    /// Register a live actor. Duplicate registration is a contract
    /// violation that risks misrouting, so it halts the process.
    pub(crate) fn actor_ready_dyn(&self, actor: Arc<dyn Actor>) {
        let id = actor.id().clone();
        let mut registry = self.registry.lock();
        if registry.actors.insert(id.clone(), actor).is_some() {
            drop(registry);
            error!(%id, "actor id registered twice");
            panic!("actor id {id} is already registered");
        }
        debug!(%id, "actor ready");
    }

    /// Register unless the id is already present (used after the
    /// on-demand resolver ran, which may have registered re-entrantly).
    fn ensure_registered(&self, actor: Arc<dyn Actor>) {
        let mut registry = self.registry.lock();
        registry
            .actors
            .entry(actor.id().clone())
            .or_insert(actor);
    }

    /// Local directory then on-demand resolver, untyped. The resolver
    /// runs outside the registry lock so it may call `actor_ready`.
    fn resolve_for_dispatch(&self, id: &ActorId) -> Option<Arc<dyn Actor>> {
        let key = self.local_key(id);
        let (existing, resolver) = {
            let registry = self.registry.lock();
            (registry.actors.get(&key).cloned(), registry.resolver.clone())
        };
        if existing.is_some() {
            return existing;
        }

        let actor = resolver.as_deref()?(id)?;
        if !actor.id().is_local_to(self.node_id) {
            warn!(id = %actor.id(), "on-demand resolver produced a foreign-node actor; rejecting");
            return None;
        }
        self.ensure_registered(actor.clone());
        Some(actor)
    }

    /// Dispatch one inbound call in its own task, with the originating
    /// connection installed as the current remote node.
    pub(crate) fn dispatch_inbound(
        self: &Arc<Self>,
        remote: Arc<RemoteNode>,
        call_id: CallId,
        recipient: ActorId,
        invocation_target: String,
        generic_subs: Vec<String>,
        args: Vec<Vec<u8>>,
    ) {
        let core = self.clone();
        tokio::spawn(async move {
            let Some(actor) = core.resolve_for_dispatch(&recipient) else {
                // No reply: the caller's timeout or cancellation surfaces it.
                warn!(%recipient, %call_id, "dropping call for unknown recipient");
                return;
            };

            let outcome = CURRENT_REMOTE
                .scope(remote.clone(), async {
                    actor
                        .receive_call(&invocation_target, &generic_subs, &args)
                        .await
                })
                .await;

            // Error detail never crosses the wire: a failed call replies
            // with an empty value and the caller sees a decode failure.
            let value = match outcome {
                Ok(value) => value,
                Err(error) => {
                    warn!(%recipient, %call_id, %error, "actor call failed; replying with empty value");
                    Vec::new()
                }
            };

            let reply = Envelope::Reply {
                call_id,
                sender: Some(recipient),
                value,
            };
            if let Err(error) = remote.send_envelope(&reply).await {
                debug!(%call_id, %error, "could not send reply");
            }
        });
    }
}

/// The per-process actor runtime.
pub struct ActorSystem {
    core: Arc<SystemCore>,
    managers: Mutex<Vec<Arc<dyn Manager>>>,
}

impl ActorSystem {
    /// Create a system with the default JSON envelope codec.
    pub fn new(config: SystemConfig) -> Arc<Self> {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    /// Create a system with a custom envelope codec.
    pub fn with_codec(config: SystemConfig, codec: Arc<dyn WireCodec>) -> Arc<Self> {
        let core = SystemCore::new(config, codec);
        info!(node_id = %core.node_id, "actor system starting");
        Arc::new(Self {
            core,
            managers: Mutex::new(Vec::new()),
        })
    }

    /// This node's stable identifier.
    pub fn node_id(&self) -> NodeId {
        self.core.node_id
    }

    /// Nodes with a live connection right now.
    pub fn known_nodes(&self) -> Vec<NodeId> {
        self.core.directory.known_nodes()
    }

    /// Assign an id for a new actor of type `A`.
    ///
    /// A hint is adopted verbatim (stamped with the local node); a hint
    /// naming an already-registered id halts the process. Without a hint
    /// a random typed id is minted.
    pub fn assign_id<A: Actor>(&self, hint: Option<ActorId>) -> ActorId {
        match hint {
            Some(id) => {
                let id = id.with_node(self.core.node_id);
                if self.core.registry.lock().actors.contains_key(&id) {
                    error!(%id, "assign_id hint names a registered actor");
                    panic!("actor id {id} is already registered");
                }
                id
            }
            None => ActorId::random_for::<A>().with_node(self.core.node_id),
        }
    }

    /// Insert a constructed actor into the local directory.
    pub fn actor_ready<A: Actor>(&self, actor: Arc<A>) {
        self.core.actor_ready_dyn(actor);
    }

    /// Remove an id from the local directory. Inbound calls arriving
    /// afterwards no longer resolve and are dropped; calls already
    /// dispatched run to completion.
    pub fn resign_id(&self, id: &ActorId) {
        let key = self.core.local_key(id);
        if self.core.registry.lock().actors.remove(&key).is_some() {
            debug!(%key, "actor resigned");
        }
    }

    /// Create and register a local actor in one step.
    ///
    /// The assigned id (hinted or minted, always stamped with the local
    /// node) is passed to the factory, which runs synchronously; the
    /// actor is registered before this returns.
    pub fn make_local_actor<A, F>(&self, id: Option<ActorId>, factory: F) -> Arc<A>
    where
        A: Actor,
        F: FnOnce(ActorId) -> A,
    {
        let id = self.assign_id::<A>(id);
        let actor = Arc::new(factory(id));
        self.actor_ready(actor.clone());
        actor
    }

    /// Typed local resolution.
    ///
    /// `Ok(None)` means the id is not hosted here and should be treated
    /// as remote. A type mismatch fails with
    /// [`ActorSystemError::ResolveFailedToMatchActorType`]; a resolver
    /// that produces an actor homed on another node fails with
    /// [`ActorSystemError::ResolveFailed`].
    pub fn resolve<A: Actor>(&self, id: &ActorId) -> Result<Option<Arc<A>>> {
        let key = self.core.local_key(id);
        let (existing, resolver) = {
            let registry = self.core.registry.lock();
            (registry.actors.get(&key).cloned(), registry.resolver.clone())
        };
        if let Some(actor) = existing {
            return downcast_actor::<A>(actor).map(Some);
        }

        let Some(resolver) = resolver else {
            return Ok(None);
        };
        // The resolver runs outside the registry lock, so it may call
        // actor_ready itself without deadlocking.
        let Some(actor) = (resolver.as_ref())(id) else {
            return Ok(None);
        };
        if !actor.id().is_local_to(self.core.node_id) {
            return Err(ActorSystemError::ResolveFailed { id: id.clone() });
        }
        let typed = downcast_actor::<A>(actor.clone())?;
        self.core.ensure_registered(actor);
        Ok(Some(typed))
    }

    /// Install the on-demand resolve fallback.
    pub fn register_on_demand_resolver<F>(&self, resolver: F)
    where
        F: Fn(&ActorId) -> Option<Arc<dyn Actor>> + Send + Sync + 'static,
    {
        self.core.registry.lock().resolver = Some(Arc::new(resolver));
    }

    /// Invoke a method on a remotely-hosted actor and await the reply
    /// bytes. The caller decodes them with its own codec.
    pub async fn remote_call(
        &self,
        recipient: &ActorId,
        invocation_target: &str,
        generic_subs: Vec<String>,
        args: Vec<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let remote = self.core.directory.remote_node_for(recipient).await?;
        let recipient = recipient.clone();
        let invocation_target = invocation_target.to_string();
        self.core
            .replies
            .send_message(move |call_id| {
                let remote = remote.clone();
                async move {
                    remote.track_call(call_id);
                    let envelope = Envelope::Call {
                        call_id,
                        recipient,
                        invocation_target,
                        generic_subs,
                        args,
                    };
                    let sent = remote.send_envelope(&envelope).await;
                    if sent.is_err() {
                        remote.untrack_call(call_id);
                    }
                    sent
                }
            })
            .await
    }

    /// Like [`remote_call`](Self::remote_call) but discards the reply value.
    pub async fn remote_call_void(
        &self,
        recipient: &ActorId,
        invocation_target: &str,
        generic_subs: Vec<String>,
        args: Vec<Vec<u8>>,
    ) -> Result<()> {
        self.remote_call(recipient, invocation_target, generic_subs, args)
            .await
            .map(|_| ())
    }

    /// Read a typed value from the calling connection's user-info map.
    /// Only valid during an inbound invocation.
    pub fn node_info<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<T>>> {
        Ok(current_remote()?.get_info::<T>(key))
    }

    /// Write a value into the calling connection's user-info map.
    /// Only valid during an inbound invocation.
    pub fn set_node_info(
        &self,
        key: impl Into<String>,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        current_remote()?.set_info(key, value);
        Ok(())
    }

    /// Bind a server endpoint and start accepting peers. Returns the
    /// bound address (port 0 resolves to the ephemeral port).
    pub async fn run_server(&self, address: ServerAddress) -> Result<SocketAddr> {
        let manager = Arc::new(ServerManager::bind(self.core.clone(), address).await?);
        let local_addr = manager.local_addr();
        self.managers.lock().push(manager);
        Ok(local_addr)
    }

    /// Start a resilient client connection to the address.
    pub fn connect_client(&self, address: ServerAddress) {
        self.connect_client_with_monitor(address, None)
    }

    /// Start a resilient client connection, observing state transitions
    /// through the monitor callback.
    pub fn connect_client_with_monitor(
        &self,
        address: ServerAddress,
        monitor: Option<ConnectionMonitor>,
    ) {
        let manager = Arc::new(ClientManager::start(self.core.clone(), address, monitor));
        self.managers.lock().push(manager);
    }

    /// Cancel every manager in parallel and wait for all of them to
    /// terminate, then fail any still-pending replies.
    pub async fn shutdown_gracefully(&self) {
        let managers: Vec<Arc<dyn Manager>> = {
            let mut held = self.managers.lock();
            held.drain(..).collect()
        };
        info!(count = managers.len(), "shutting down managers");
        join_all(managers.iter().map(|manager| manager.cancel())).await;
        self.core.replies.fail_all(ActorSystemError::ConnectionLost);
        info!("actor system stopped");
    }
}

fn downcast_actor<A: Actor>(actor: Arc<dyn Actor>) -> Result<Arc<A>> {
    let found = actor
        .id()
        .type_tag
        .clone()
        .unwrap_or_else(|| "<untagged>".to_string());
    actor
        .as_any()
        .downcast::<A>()
        .map_err(|_| ActorSystemError::ResolveFailedToMatchActorType {
            found,
            expected: std::any::type_name::<A>()
                .rsplit("::")
                .next()
                .unwrap_or("<unknown>")
                .to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo {
        id: ActorId,
    }

    #[async_trait]
    impl Actor for Echo {
        fn id(&self) -> &ActorId {
            &self.id
        }

        async fn receive_call(
            &self,
            _target: &str,
            _generic_subs: &[String],
            args: &[Vec<u8>],
        ) -> Result<Vec<u8>> {
            Ok(args.first().cloned().unwrap_or_default())
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[derive(Debug)]
    struct Other {
        id: ActorId,
    }

    #[async_trait]
    impl Actor for Other {
        fn id(&self) -> &ActorId {
            &self.id
        }

        async fn receive_call(
            &self,
            _target: &str,
            _generic_subs: &[String],
            _args: &[Vec<u8>],
        ) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[tokio::test]
    async fn test_make_resolve_resign_cycle() {
        let system = ActorSystem::new(SystemConfig::default());
        let actor = system.make_local_actor(Some(ActorId::new("echo")), |id| Echo { id });

        let resolved = system.resolve::<Echo>(actor.id()).unwrap().unwrap();
        assert!(Arc::ptr_eq(&resolved, &actor));

        // A node-less id resolves against the local directory too.
        let bare = ActorId::new("echo");
        assert!(system.resolve::<Echo>(&bare).unwrap().is_some());

        system.resign_id(actor.id());
        assert!(system.resolve::<Echo>(actor.id()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_type_mismatch() {
        let system = ActorSystem::new(SystemConfig::default());
        let actor = system.make_local_actor(None, |id| Echo { id });
        let err = system.resolve::<Other>(actor.id()).unwrap_err();
        assert!(matches!(
            err,
            ActorSystemError::ResolveFailedToMatchActorType { .. }
        ));
    }

    #[tokio::test]
    async fn test_assigned_ids_are_node_stamped_and_typed() {
        let system = ActorSystem::new(SystemConfig::default());
        let actor = system.make_local_actor(None, |id| Echo { id });
        assert_eq!(actor.id().node, Some(system.node_id()));
        assert!(actor.id().has_type_of::<Echo>());
    }

    #[tokio::test]
    #[should_panic(expected = "already registered")]
    async fn test_duplicate_hint_halts() {
        let system = ActorSystem::new(SystemConfig::default());
        let hint = ActorId::new("twice");
        let _first = system.make_local_actor(Some(hint.clone()), |id| Echo { id });
        let _second = system.make_local_actor(Some(hint), |id| Echo { id });
    }

    #[tokio::test]
    async fn test_on_demand_resolver_constructs_and_registers() {
        let system = ActorSystem::new(SystemConfig::default());
        let node = system.node_id();
        system.register_on_demand_resolver(move |id| {
            (id.id == "lazy").then(|| {
                Arc::new(Echo {
                    id: id.clone().with_node(node),
                }) as Arc<dyn Actor>
            })
        });

        let id = ActorId::new("lazy").with_node(node);
        let first = system.resolve::<Echo>(&id).unwrap().unwrap();
        // Second resolve hits the directory, not the resolver.
        let second = system.resolve::<Echo>(&id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_on_demand_resolver_rejects_foreign_node() {
        let system = ActorSystem::new(SystemConfig::default());
        let foreign = NodeId::random();
        system.register_on_demand_resolver(move |id| {
            Some(Arc::new(Echo {
                id: id.clone().with_node(foreign),
            }) as Arc<dyn Actor>)
        });

        let id = ActorId::new("elsewhere").with_node(system.node_id());
        let err = system.resolve::<Echo>(&id).unwrap_err();
        assert!(matches!(err, ActorSystemError::ResolveFailed { .. }));
    }

    #[tokio::test]
    async fn test_resolver_may_reenter_actor_ready() {
        let system = ActorSystem::new(SystemConfig::default());
        let node = system.node_id();
        let core = system.core.clone();
        system.register_on_demand_resolver(move |id| {
            let actor = Arc::new(Echo {
                id: id.clone().with_node(node),
            });
            // Register from inside the handler, as server-side lazy
            // construction does. Must not deadlock or double-register.
            core.actor_ready_dyn(actor.clone());
            Some(actor as Arc<dyn Actor>)
        });

        let id = ActorId::new("reentrant").with_node(node);
        assert!(system.resolve::<Echo>(&id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_node_info_outside_dispatch_fails() {
        let system = ActorSystem::new(SystemConfig::default());
        assert_eq!(
            system.node_info::<String>("k").unwrap_err(),
            ActorSystemError::NotInDistributedActor
        );
        assert_eq!(
            system
                .set_node_info("k", Arc::new(1u32))
                .unwrap_err(),
            ActorSystemError::NotInDistributedActor
        );
    }

    #[tokio::test]
    async fn test_remote_call_without_node_id_fails() {
        let mut config = SystemConfig::default();
        config.connection_timeout = std::time::Duration::from_millis(50);
        let system = ActorSystem::new(config);
        let err = system
            .remote_call(&ActorId::new("nowhere"), "m", Vec::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActorSystemError::MissingNodeId { .. }));
    }
}
