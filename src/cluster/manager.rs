//! Per-node owner of route logs, placement and replica assignment.

use super::connector::{ClusterConnector, MembershipEvent};
use super::replicator::{LocalReplayer, RecordSink, ReplicaPuller};
use crate::config::{FailoverPolicy, TidelogConfig};
use crate::error::{Result, TidelogError};
use crate::repair::BucketSource;
use crate::resilience::{with_timeout, RetryConfig, RetryExecutor};
use crate::routing::{build_router, RoutingStrategy};
use crate::rpc::{
    server, FetchRequest, IsrUpdateRequest, LocalEndpoint, RemoteEndpoint, ReplicationClient,
    RouteRequest, WalEndpoint,
};
use crate::shutdown::{stop_all, BackgroundTask, ShutdownCoordinator};
use crate::types::{FollowerKey, Node, NodeKey, Replica, RouteKey, RouteTable};
use crate::wal::{IsrTask, Wal, WalRead};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

/// A route this node holds a replica of.
struct LocalReplica {
    replica: RwLock<Replica>,
    wal: Arc<Wal>,
    isr_task: Mutex<Option<BackgroundTask>>,
    puller: Mutex<Option<BackgroundTask>>,
    replayer: Mutex<Option<BackgroundTask>>,
}

impl LocalReplica {
    fn leader_key(&self) -> NodeKey {
        self.replica.read().leader_node_key
    }

    fn is_leader(&self) -> bool {
        self.replica.read().is_leader()
    }

    fn take_tasks(&self) -> Vec<BackgroundTask> {
        [
            self.puller.lock().take(),
            self.replayer.lock().take(),
            self.isr_task.lock().take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Owns every route log on this node and keeps them placed and replicated.
///
/// The coordinator assigns routes to nodes and pushes each slot to the node
/// that holds it. Every node opens a log per slot it holds; followers pull
/// from the leader, leaders track follower progress and report ISR state
/// back to the coordinator.
pub struct WalManager {
    config: TidelogConfig,
    local: Node,
    connector: Arc<dyn ClusterConnector>,
    router: Arc<dyn RoutingStrategy>,
    client: ReplicationClient,
    retry: RetryExecutor,
    sink: RwLock<Option<Arc<dyn RecordSink>>>,
    buckets: RwLock<Option<Arc<dyn BucketSource>>>,
    /// Shared table on the coordinator, a cache elsewhere.
    table: RwLock<RouteTable>,
    members: RwLock<HashMap<NodeKey, Node>>,
    locals: RwLock<HashMap<RouteKey, Arc<LocalReplica>>>,
    tasks: Mutex<Vec<BackgroundTask>>,
    /// Serializes coordinator changes to the table.
    assign_lock: tokio::sync::Mutex<()>,
    /// Serializes opening and re-pointing local replicas.
    apply_lock: tokio::sync::Mutex<()>,
    shutdown: ShutdownCoordinator,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl WalManager {
    pub fn new(config: TidelogConfig, connector: Arc<dyn ClusterConnector>) -> Result<Arc<Self>> {
        config.validate()?;
        let client = ReplicationClient::new(&config.network)?;
        let local = config.local_node();
        let router = build_router(config.cluster.routing);
        let retry = RetryExecutor::new(config.network.retry.clone());

        Ok(Arc::new(Self {
            config,
            local,
            connector,
            router,
            client,
            retry,
            sink: RwLock::new(None),
            buckets: RwLock::new(None),
            table: RwLock::new(RouteTable::new()),
            members: RwLock::new(HashMap::new()),
            locals: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            assign_lock: tokio::sync::Mutex::new(()),
            apply_lock: tokio::sync::Mutex::new(()),
            shutdown: ShutdownCoordinator::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Attaches the engine that replays local logs. Takes effect for
    /// replicas applied afterwards.
    pub fn with_sink(self: Arc<Self>, sink: Arc<dyn RecordSink>) -> Arc<Self> {
        *self.sink.write() = Some(sink);
        self
    }

    /// Attaches raw bucket access for repair requests.
    pub fn with_bucket_source(self: Arc<Self>, source: Arc<dyn BucketSource>) -> Arc<Self> {
        *self.buckets.write() = Some(source);
        self
    }

    /// Binds the RPC server. Its lifetime is tied to [`WalManager::stop`].
    pub async fn serve(self: &Arc<Self>, addr: &str) -> Result<SocketAddr> {
        let (task, bound) = server::bind(self.clone(), addr, self.shutdown.clone()).await?;
        self.tasks.lock().push(task);
        Ok(bound)
    }

    /// Joins the cluster and resumes every local replica.
    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let events = self.connector.subscribe();
        self.connector.init(&self.local).await?;
        for member in self.connector.members() {
            self.add_member(member);
        }

        let listener = self.spawn_membership_listener(events);
        self.tasks.lock().push(listener);

        self.resume().await?;
        if self.connector.is_coordinator() {
            self.make_coordinator().await?;
        }

        let reporter = self.spawn_isr_reporter();
        self.tasks.lock().push(reporter);

        info!(
            members = self.members.read().len(),
            coordinator = self.connector.is_coordinator(),
            routes = self.locals.read().len(),
            "WAL manager started"
        );
        Ok(())
    }

    fn spawn_membership_listener(
        self: &Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<MembershipEvent>,
    ) -> BackgroundTask {
        let weak: Weak<Self> = Arc::downgrade(self);
        BackgroundTask::spawn_with("membership", self.shutdown.clone(), move |shutdown| async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.wait_for_shutdown() => break,
                    event = events.recv() => event,
                };
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => manager.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Membership events lagged, resyncing members");
                        for member in manager.connector.members() {
                            manager.add_member(member);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::NodeJoined(node) => self.node_joined(node),
            MembershipEvent::NodeLeft(node) => {
                if node.key != self.local.key {
                    self.node_left(node.key).await;
                }
            }
            MembershipEvent::CoordinatorElected(node) => {
                if node.key == self.local.key && !self.is_stopped() {
                    if let Err(e) = self.make_coordinator().await {
                        error!(error = %e, "Failed to take over as coordinator");
                    }
                }
            }
        }
    }

    fn spawn_isr_reporter(self: &Arc<Self>) -> BackgroundTask {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.cluster.isr_report_interval;
        BackgroundTask::spawn_with("isr-report", self.shutdown.clone(), move |shutdown| async move {
            while shutdown.sleep(interval).await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.report_isr().await;
            }
        })
    }

    /// Sends the ISR flags of every locally led route to the coordinator.
    async fn report_isr(&self) {
        let reports: Vec<IsrUpdateRequest> = {
            let locals = self.locals.read();
            let table = self.table.read();
            let reports = locals
                .iter()
                .filter(|(_, local)| local.is_leader())
                .filter_map(|(route_key, local)| {
                    let slots = table.get(*route_key)?;
                    let statuses: BTreeMap<NodeKey, bool> = slots
                        .iter()
                        .filter(|s| !s.is_leader())
                        .map(|s| (s.replica_node_key, local.wal.is_isr(s.replica_node_key)))
                        .collect();
                    (!statuses.is_empty()).then(|| IsrUpdateRequest {
                        route_key: *route_key,
                        statuses,
                    })
                })
                .collect();
            reports
        };

        for report in reports {
            let result = if self.connector.is_coordinator() {
                self.update_replica_isr(report.route_key, &report.statuses).await
            } else {
                match self.connector.coordinator() {
                    // a slow coordinator must not stall the next round
                    Some(coordinator) => {
                        let endpoint = coordinator.endpoint();
                        with_timeout(self.config.cluster.isr_report_interval, || {
                            self.client.report_isr(&endpoint, &report)
                        })
                        .await
                    }
                    None => Ok(()),
                }
            };
            if let Err(e) = result {
                debug!(route_key = report.route_key, error = %e, "ISR report failed");
            }
        }
    }

    /// Creates the assignment for a route, or returns the existing one.
    ///
    /// Only the coordinator places routes. The first node picked leads. The
    /// factor must fit the current cluster even for a route that exists.
    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn add_routable_key(&self, route_key: RouteKey, replication_factor: usize) -> Result<Vec<Replica>> {
        if !self.connector.is_coordinator() {
            return Err(TidelogError::NotCoordinator {
                coordinator: self.connector.coordinator().map(|n| n.key),
            });
        }

        let cluster_size = self.connector.cluster_size();
        if replication_factor == 0 || replication_factor > cluster_size {
            return Err(TidelogError::InvalidArgument(format!(
                "replication factor {} outside 1..={}",
                replication_factor, cluster_size
            )));
        }

        let _guard = self.assign_lock.lock().await;

        let existing = self.table.read().get(route_key).cloned();
        if let Some(existing) = existing {
            let leader_live = existing.first().map_or(false, |r| self.is_live(r.leader_node_key));
            if leader_live {
                return Ok(existing);
            }
            // deferred failover lands here
            self.redesignate_locked(|key| key == route_key).await?;
            return self
                .table
                .read()
                .get(route_key)
                .cloned()
                .ok_or(TidelogError::RouteNotFound(route_key));
        }

        for member in self.connector.members() {
            self.add_member(member);
        }
        let nodes = self.router.nodes_for(route_key, replication_factor);
        if nodes.len() < replication_factor {
            return Err(TidelogError::InsufficientNodes {
                requested: replication_factor,
                available: nodes.len(),
            });
        }

        let leader = &nodes[0];
        let replicas: Vec<Replica> = nodes
            .iter()
            .map(|node| {
                let mut slot = Replica::new(route_key, leader, node);
                slot.isr = slot.is_leader();
                slot
            })
            .collect();

        let table = {
            let mut table = self.table.write();
            table.coordinator = Some(self.local.key);
            table.insert(route_key, replicas.clone());
            table.clone()
        };
        if let Err(e) = self.connector.update_table(&table).await {
            self.table.write().routes.remove(&route_key);
            return Err(e);
        }

        info!(
            route_key,
            leader = %leader,
            replicas = replicas.len(),
            version = table.version,
            "Assigned route"
        );
        self.distribute(&replicas).await;
        Ok(replicas)
    }

    /// Applies local slots and pushes the rest to their members.
    async fn distribute(&self, replicas: &[Replica]) {
        let once = RetryExecutor::new(RetryConfig::once());
        for replica in replicas {
            if replica.replica_node_key == self.local.key {
                if let Err(e) = self.apply_replica(replica.clone()).await {
                    error!(route_key = replica.route_key, error = %e, "Failed to apply local replica");
                }
                continue;
            }

            let endpoint = replica.replica().endpoint();
            let result = once
                .execute("push_replica", || self.client.push_replica(&endpoint, replica))
                .await;
            if let Err(e) = result {
                warn!(
                    route_key = replica.route_key,
                    member = %endpoint,
                    error = %e,
                    "Replica push failed, member will reconcile on resume"
                );
            }
        }
    }

    /// Resolves a route, creating it through the coordinator when unassigned.
    pub async fn request_route(&self, route_key: RouteKey, replication_factor: usize) -> Result<Vec<Replica>> {
        if self.connector.is_coordinator() {
            return self.add_routable_key(route_key, replication_factor).await;
        }

        let coordinator = self
            .connector
            .coordinator()
            .ok_or(TidelogError::NotCoordinator { coordinator: None })?;
        let request = RouteRequest {
            route_key,
            replication_factor,
        };
        let response = self.client.request_route(&coordinator.endpoint(), &request).await?;
        if response.replicas.is_empty() {
            return Err(TidelogError::RouteNotFound(route_key));
        }

        self.table.write().routes.insert(route_key, response.replicas.clone());
        Ok(response.replicas)
    }

    /// The local log of a route.
    pub fn get_wal(&self, route_key: RouteKey) -> Result<Arc<Wal>> {
        self.local_wal(route_key).ok_or(TidelogError::NotLocal {
            route_key,
            leader: self.get_replica_leader(route_key),
        })
    }

    pub fn local_wal(&self, route_key: RouteKey) -> Option<Arc<Wal>> {
        self.locals.read().get(&route_key).map(|l| l.wal.clone())
    }

    pub fn get_replica_leader(&self, route_key: RouteKey) -> Option<NodeKey> {
        self.table.read().leader(route_key)
    }

    pub fn replicas(&self, route_key: RouteKey) -> Vec<Replica> {
        self.table.read().get(route_key).cloned().unwrap_or_default()
    }

    pub fn route_table(&self) -> RouteTable {
        self.table.read().clone()
    }

    /// Routes with a local replica.
    pub fn local_routes(&self) -> Vec<RouteKey> {
        let mut routes: Vec<_> = self.locals.read().keys().copied().collect();
        routes.sort_unstable();
        routes
    }

    /// Appends to the route log, forwarding to the leader when it is remote.
    #[instrument(skip(self, payload), fields(node = %self.local, len = payload.len()))]
    pub async fn write(&self, route_key: RouteKey, payload: Bytes) -> Result<u64> {
        let leader = match self.leader_node(route_key) {
            Some(leader) if self.is_live(leader.key) => leader,
            _ => {
                let replicas = self
                    .request_route(route_key, self.config.cluster.default_replication_factor)
                    .await?;
                replicas
                    .first()
                    .map(|r| r.leader())
                    .ok_or(TidelogError::RouteNotFound(route_key))?
            }
        };

        if leader.key == self.local.key {
            let endpoint = LocalEndpoint::new(self.leader_wal(route_key)?);
            return endpoint.write(route_key, payload).await;
        }

        let endpoint = RemoteEndpoint::new(self.client.clone(), leader.endpoint());
        self.retry
            .execute("forward_write", || endpoint.write(route_key, payload.clone()))
            .await
            .map_err(|e| TidelogError::WriteFailed {
                route_key,
                reason: format!("leader {}: {}", leader, e),
            })
    }

    /// Appends to a route this node leads.
    pub fn write_local(&self, route_key: RouteKey, payload: &[u8], fsync: bool) -> Result<u64> {
        self.leader_wal(route_key)?.write(payload, fsync)
    }

    fn leader_wal(&self, route_key: RouteKey) -> Result<Arc<Wal>> {
        let local = self.locals.read().get(&route_key).cloned();
        match local {
            Some(local) if local.is_leader() => Ok(local.wal.clone()),
            other => Err(TidelogError::NotLocal {
                route_key,
                leader: other
                    .map(|l| l.leader_key())
                    .or_else(|| self.get_replica_leader(route_key)),
            }),
        }
    }

    /// Reads a route log, locally when a replica is held here.
    pub async fn read(
        &self,
        route_key: RouteKey,
        follower: FollowerKey,
        from_offset: u64,
        max_bytes: u32,
        committed_only: bool,
    ) -> Result<WalRead> {
        let endpoint: Box<dyn WalEndpoint> = match self.local_wal(route_key) {
            Some(wal) => Box::new(LocalEndpoint::new(wal)),
            None => {
                let leader = self
                    .leader_node(route_key)
                    .ok_or(TidelogError::RouteNotFound(route_key))?;
                Box::new(RemoteEndpoint::new(self.client.clone(), leader.endpoint()))
            }
        };
        let request = FetchRequest {
            route_key,
            follower_key: follower,
            from_offset,
            max_bytes,
            committed_only,
        };
        endpoint.fetch(&request).await
    }

    /// Opens the local log for a slot and starts the tasks it needs.
    ///
    /// Applying a slot again re-points the follower puller when the leader
    /// has moved; when this node became the leader, pulling stops.
    #[instrument(skip(self, replica), fields(node = %self.local, route_key = replica.route_key))]
    pub async fn apply_replica(&self, replica: Replica) -> Result<()> {
        if replica.replica_node_key != self.local.key {
            return Err(TidelogError::InvalidArgument(format!(
                "slot of route {} belongs to node {:016x}",
                replica.route_key, replica.replica_node_key
            )));
        }
        if self.is_stopped() {
            return Err(TidelogError::ShuttingDown);
        }

        let _guard = self.apply_lock.lock().await;
        let route_key = replica.route_key;
        self.table.write().upsert(replica.clone());

        let existing = self.locals.read().get(&route_key).cloned();
        if let Some(local) = existing {
            let previous = std::mem::replace(&mut *local.replica.write(), replica.clone());
            if previous.leader_node_key == replica.leader_node_key {
                return Ok(());
            }

            let old_puller = local.puller.lock().take();
            if let Some(task) = old_puller {
                task.stop().await;
            }
            if !replica.is_leader() {
                *local.puller.lock() = Some(self.spawn_puller(&replica, local.wal.clone()));
            }
            info!(
                route_key,
                leader = %replica.leader(),
                leading = replica.is_leader(),
                offset = local.wal.offset(),
                "Route leader changed"
            );
            return Ok(());
        }

        let dir = self.config.wal.dir.join(route_key.to_string());
        let wal = Arc::new(Wal::open(&dir, &self.config.wal, &self.config.isr)?);
        let isr_task = IsrTask::spawn(wal.clone(), &self.config.isr);
        let puller = (!replica.is_leader()).then(|| self.spawn_puller(&replica, wal.clone()));
        let sink = self.sink.read().clone();
        let replayer = sink.map(|sink| {
            LocalReplayer::spawn(route_key, wal.clone(), sink, self.local.key, &self.config.replication)
        });

        info!(
            route_key,
            leader = %replica.leader(),
            leading = replica.is_leader(),
            offset = wal.offset(),
            "Opened route log"
        );
        self.locals.write().insert(
            route_key,
            Arc::new(LocalReplica {
                replica: RwLock::new(replica),
                wal,
                isr_task: Mutex::new(Some(isr_task)),
                puller: Mutex::new(puller),
                replayer: Mutex::new(replayer),
            }),
        );
        Ok(())
    }

    fn spawn_puller(&self, replica: &Replica, wal: Arc<Wal>) -> BackgroundTask {
        ReplicaPuller::spawn(
            replica.route_key,
            wal,
            replica.leader(),
            self.local.key,
            self.client.clone(),
            &self.config.replication,
        )
    }

    /// Adds a member to placement. Existing routes are not rebalanced.
    pub fn node_joined(&self, node: Node) {
        if self.add_member(node.clone()) {
            info!(node = %node, members = self.members.read().len(), "Node joined");
        }
    }

    fn add_member(&self, node: Node) -> bool {
        let added = self.members.write().insert(node.key, node.clone()).is_none();
        self.router.add_node(node);
        added
    }

    /// Drops a member and, on the coordinator, moves leadership off it.
    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn node_left(&self, key: NodeKey) {
        let removed = self.members.write().remove(&key);
        self.router.remove_node(key);
        info!(lost = key, known = removed.is_some(), "Node left");

        let orphaned: Vec<Arc<LocalReplica>> = self
            .locals
            .read()
            .values()
            .filter(|l| l.leader_key() == key)
            .cloned()
            .collect();
        for local in orphaned {
            let puller = local.puller.lock().take();
            if let Some(task) = puller {
                task.stop().await;
            }
        }

        if !self.connector.is_coordinator() {
            return;
        }
        match self.config.cluster.failover {
            FailoverPolicy::Eager => {
                let _guard = self.assign_lock.lock().await;
                // a former follower only caches its own slots
                if let Err(e) = self.adopt_shared_table().await {
                    warn!(error = %e, "Could not fetch shared route table");
                }
                if let Err(e) = self.redesignate_locked(|_| true).await {
                    error!(lost = key, error = %e, "Failover failed");
                }
            }
            FailoverPolicy::OnDemand => {
                debug!(lost = key, "Failover deferred until routes are next requested");
            }
        }
    }

    /// Moves leadership of matching routes off members that are gone.
    ///
    /// Dead slots are dropped. The new leader is the first remaining
    /// in-sync replica, or the first remaining replica when none is in sync.
    /// Caller holds `assign_lock`.
    async fn redesignate_locked<F>(&self, filter: F) -> Result<usize>
    where
        F: Fn(RouteKey) -> bool,
    {
        let live: HashSet<NodeKey> = self
            .members
            .read()
            .keys()
            .copied()
            .chain(std::iter::once(self.local.key))
            .collect();

        let (table, updates, moved) = {
            let mut table = self.table.write();
            let mut updates = Vec::new();
            let mut changed = false;
            let mut moved = 0;

            for (route_key, slots) in table.routes.iter_mut() {
                if !filter(*route_key) {
                    continue;
                }
                let Some(leader) = slots.first().map(|s| s.leader_node_key) else {
                    continue;
                };
                if slots.iter().all(|s| live.contains(&s.replica_node_key)) {
                    continue;
                }

                let survivors: Vec<Replica> = slots
                    .iter()
                    .filter(|s| live.contains(&s.replica_node_key))
                    .cloned()
                    .collect();
                if survivors.is_empty() {
                    warn!(route_key, "No live replica left for route");
                    continue;
                }

                let mut survivors = survivors;
                if !live.contains(&leader) {
                    let pos = survivors.iter().position(|s| s.isr).unwrap_or(0);
                    let promoted = survivors.remove(pos);
                    survivors.insert(0, promoted);
                    let new_leader = survivors[0].replica();
                    for slot in survivors.iter_mut() {
                        slot.set_leader(&new_leader);
                    }
                    survivors[0].isr = true;
                    info!(route_key, lost = leader, leader = %new_leader, "Redesignated route leader");
                    updates.extend(survivors.iter().cloned());
                    moved += 1;
                }
                *slots = survivors;
                changed = true;
            }

            if changed {
                table.version += 1;
                table.coordinator = Some(self.local.key);
            }
            (changed.then(|| table.clone()), updates, moved)
        };

        if let Some(table) = table {
            self.connector.update_table(&table).await?;
            self.distribute(&updates).await;
        }
        Ok(moved)
    }

    /// Takes over placement: adopts the shared table and repairs it.
    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn make_coordinator(&self) -> Result<()> {
        let _guard = self.assign_lock.lock().await;

        self.adopt_shared_table().await?;
        self.table.write().coordinator = Some(self.local.key);

        let moved = self.redesignate_locked(|_| true).await?;

        let led = self.table.read().replicas_on(self.local.key);
        let orphaned: Vec<Replica> = {
            let locals = self.locals.read();
            let orphaned = led
                .into_iter()
                .filter(|r| r.is_leader() && !locals.contains_key(&r.route_key))
                .collect();
            orphaned
        };
        for replica in orphaned {
            if let Err(e) = self.apply_replica(replica).await {
                error!(error = %e, "Failed to reopen led route");
            }
        }

        let table = self.route_table();
        self.connector.update_table(&table).await?;
        info!(
            version = table.version,
            routes = table.routes.len(),
            redesignated = moved,
            "Acting as coordinator"
        );
        Ok(())
    }

    /// Applies every slot the shared table assigns to this node.
    pub async fn resume(&self) -> Result<()> {
        if let Err(e) = self.adopt_shared_table().await {
            warn!(error = %e, "Could not fetch shared route table");
        }

        let mine = self.table.read().replicas_on(self.local.key);
        let count = mine.len();
        for replica in mine {
            let route_key = replica.route_key;
            if let Err(e) = self.apply_replica(replica).await {
                error!(route_key, error = %e, "Failed to resume replica");
            }
        }
        if count > 0 {
            info!(replicas = count, "Resumed local replicas");
        }
        Ok(())
    }

    /// Replaces the local table with the shared one unless ours is newer.
    async fn adopt_shared_table(&self) -> Result<()> {
        if let Some(shared) = self.connector.fetch_table().await? {
            let mut table = self.table.write();
            if shared.version >= table.version {
                *table = shared;
            }
        }
        Ok(())
    }

    /// Records follower ISR flags reported by a route leader.
    pub async fn update_replica_isr(&self, route_key: RouteKey, statuses: &BTreeMap<NodeKey, bool>) -> Result<()> {
        if !self.connector.is_coordinator() {
            return Err(TidelogError::NotCoordinator {
                coordinator: self.connector.coordinator().map(|n| n.key),
            });
        }

        let _guard = self.assign_lock.lock().await;
        let changed = {
            let mut table = self.table.write();
            let slots = table
                .routes
                .get_mut(&route_key)
                .ok_or(TidelogError::RouteNotFound(route_key))?;
            let mut changed = false;
            for slot in slots.iter_mut() {
                if let Some(&isr) = statuses.get(&slot.replica_node_key) {
                    if slot.isr != isr {
                        slot.isr = isr;
                        changed = true;
                    }
                }
            }
            if changed {
                table.version += 1;
            }
            changed.then(|| table.clone())
        };

        if let Some(table) = changed {
            debug!(route_key, version = table.version, "ISR flags updated");
            self.connector.update_table(&table).await?;
        }
        Ok(())
    }

    /// Stops every task, closes every log and leaves the cluster.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(node = %self.local, "Stopping WAL manager");

        self.shutdown.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        stop_all(tasks).await;

        let locals: Vec<Arc<LocalReplica>> = self.locals.write().drain().map(|(_, l)| l).collect();
        let replica_tasks = locals.iter().flat_map(|l| l.take_tasks()).collect();
        stop_all(replica_tasks).await;

        for local in &locals {
            if let Err(e) = local.wal.close() {
                warn!(dir = %local.wal.dir().display(), error = %e, "Failed to close route log");
            }
        }

        self.connector.stop().await?;
        info!(node = %self.local, routes = locals.len(), "WAL manager stopped");
        Ok(())
    }

    fn leader_node(&self, route_key: RouteKey) -> Option<Node> {
        self.table
            .read()
            .get(route_key)
            .and_then(|slots| slots.first())
            .map(|slot| slot.leader())
    }

    fn is_live(&self, key: NodeKey) -> bool {
        key == self.local.key || self.members.read().contains_key(&key)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_coordinator(&self) -> bool {
        self.connector.is_coordinator()
    }

    pub fn local_node(&self) -> &Node {
        &self.local
    }

    pub fn config(&self) -> &TidelogConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<dyn RoutingStrategy> {
        &self.router
    }

    pub fn connector(&self) -> &Arc<dyn ClusterConnector> {
        &self.connector
    }

    pub fn client(&self) -> &ReplicationClient {
        &self.client
    }

    pub fn bucket_source(&self) -> Option<Arc<dyn BucketSource>> {
        self.buckets.read().clone()
    }

    pub fn members(&self) -> Vec<Node> {
        let mut members: Vec<_> = self.members.read().values().cloned().collect();
        members.sort_by_key(|n| n.key);
        members
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("local", &self.local)
            .field("routes", &self.locals.read().len())
            .field("members", &self.members.read().len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
