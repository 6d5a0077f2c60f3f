pub mod data;
pub mod nomination;
pub mod pairing;
mod responder;
pub mod scheduler;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use util::Conn;

use crate::candidate::{CandidateInfo, CandidateType, default_priority};
use crate::checklist::CandidatePairState;
use crate::component::{Component, PAC_TIMEOUT};
use crate::control::Role;
use crate::error::{Error, ErrorKind, Result};
use crate::local_address::{sort_for_gathering, LocalAddress};
use crate::local_transport::{LocalTransport, Path};
use crate::port_reserver::PortReserver;
use crate::rand::{generate_pwd, generate_ufrag};
use crate::stun_client::discover_reflexive_address;
use crate::stun_discoverer::{DiscovererSignal, Service, StunDiscoverer};
use crate::transaction_pool::TransactionPool;
use crate::transport_address::TransportAddress;
use crate::turn_client::TurnAllocateClient;

/// Tick cadence for the check scheduler (Section 4.8).
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);

/// Local-preference component of CandidateInfo::priority, for the Nth
/// (0-indexed) of `total` local addresses gathered for one component, in
/// the order `sort_for_gathering` produced. RFC 8445 leaves the exact
/// local-preference formula to the implementation as long as it fits 16
/// bits and addresses gathered earlier (broader scope, IPv6-preferred) are
/// never preferred less than ones gathered later.
fn local_preference(ordinal: usize, total: usize) -> u32 {
    if total <= 1 {
        return 65535;
    }
    let step = 65535 / (total as u32 - 1).max(1);
    65535_u32.saturating_sub(ordinal as u32 * step)
}

/// Negotiated feature flags (Section 6), a small bitset mirroring
/// `ServiceFlags`'s shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(u8);

impl FeatureFlags {
    pub const TRICKLE: FeatureFlags = FeatureFlags(0b001);
    pub const AGGRESSIVE_NOMINATION: FeatureFlags = FeatureFlags(0b010);
    pub const NOT_NOMINATED_DATA: FeatureFlags = FeatureFlags(0b100);

    pub const fn empty() -> Self {
        FeatureFlags(0)
    }

    pub fn contains(&self, other: FeatureFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FeatureFlags {
    type Output = FeatureFlags;
    fn bitor(self, rhs: FeatureFlags) -> FeatureFlags {
        FeatureFlags(self.0 | rhs.0)
    }
}

/// Agent lifecycle state (Section 3's data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Stopped,
    Starting,
    Started,
    Active,
    Stopping,
}

/// Signals the agent emits, in the causal order Section 5 requires. This is
/// a plain message-passing channel rather than re-entrant callbacks, per
/// the REDESIGN FLAGS note on replacing signal/slot re-entry guards with
/// explicit state checks after any call that may recursively emit: nothing
/// here ever calls back into agent code synchronously.
#[derive(Debug, Clone)]
pub enum Signal {
    Started,
    LocalCandidatesReady(Vec<CandidateInfo>),
    LocalGatheringComplete,
    ComponentReady(u8),
    ReadyToSendMedia,
    IceFinished,
    ReadyRead(u8),
    DatagramsWritten(u8, usize),
    Error(ErrorKind),
    Stopped,
}

/// Construction-time parameters. Most per-session configuration is still
/// set through the `set_*` methods named in Section 6, mirroring how the
/// rest of this crate's collaborators take one config struct up front and
/// are mutated afterward.
#[derive(Default)]
pub struct AgentConfig {
    pub component_count: usize,
    pub local_addresses: Vec<LocalAddress>,
    pub external_addresses: HashMap<TransportAddress, TransportAddress>,
}

/// One local candidate plus the owning-transport handle and path index the
/// data model calls for: a CandidateInfo is value-like and shared, but a
/// local Candidate also needs to know which socket sends on it.
#[derive(Debug, Clone)]
struct LocalCandidate {
    info: CandidateInfo,
    transport_index: usize,
    path: Path,
    /// Carried from the gathering `LocalAddress` (false for srflx/relayed,
    /// which aren't tied to a single interface) so a later connectivity
    /// check's PRIORITY attribute can be recomputed per Section 4.6's
    /// peer-reflexive-priority rule.
    on_virtual_interface: bool,
}

struct ComponentRuntime {
    component: Component,
    transports: Vec<Arc<LocalTransport>>,
    pools: Vec<Arc<TransactionPool>>,
    /// The direct-path socket handle each transport was built on, kept
    /// aside so a transport can be rebuilt with a relayed conn attached
    /// once a TURN allocation completes (`LocalTransport` has no setter for
    /// that field, since it is otherwise immutable after construction).
    /// Kept concretely typed (rather than `Arc<dyn Conn>`) so that once a
    /// borrowed socket's transport has stopped, `Arc::try_unwrap` can
    /// recover the owned `UdpSocket` and hand it back to the port reserver.
    direct_conns: Vec<Arc<UdpSocket>>,
    locals: Vec<LocalCandidate>,
    signalled_ready: bool,
}

impl ComponentRuntime {
    fn new(id: u8) -> Self {
        ComponentRuntime {
            component: Component::new(id),
            transports: Vec::new(),
            pools: Vec::new(),
            direct_conns: Vec::new(),
            locals: Vec::new(),
            signalled_ready: false,
        }
    }
}

/// Resolves the conn and transaction pool a connectivity check for
/// `candidate_id` should run over. A free function, rather than a
/// `ComponentRuntime` method, so its borrow of `transports`/`pools`/`locals`
/// stays disjoint from a simultaneous `&mut rt.component` borrow at the
/// call site.
fn resolve_conn_and_pool<'a>(
    transports: &'a [Arc<LocalTransport>],
    pools: &'a [Arc<TransactionPool>],
    locals: &'a [LocalCandidate],
    candidate_id: u64,
) -> Option<(&'a (dyn Conn + Send + Sync), Arc<TransactionPool>)> {
    let local = locals.iter().find(|l| l.info.id == candidate_id)?;
    let transport = transports.get(local.transport_index)?;
    let conn = match local.path {
        Path::Direct => transport.as_conn(),
        Path::Relayed => transport.relayed_conn()?,
    };
    Some((conn, pools[local.transport_index].clone()))
}

/// Section 4.6's peer-reflexive-priority slot: a local candidate's ordinal
/// within its own path (direct-path candidates count from 0; relayed
/// candidates count from 0 too but offset by 512 so the two scales never
/// collide), in gathering order.
fn prflx_check_priority(locals: &[LocalCandidate], candidate_id: u64) -> u32 {
    let Some(local) = locals.iter().find(|l| l.info.id == candidate_id) else {
        return 0;
    };
    let slot = locals
        .iter()
        .filter(|l| l.path == local.path)
        .position(|l| l.info.id == candidate_id)
        .unwrap_or(0) as u32;
    let slot = match local.path {
        Path::Direct => slot,
        Path::Relayed => 512 + slot,
    };
    crate::candidate::prflx_priority(slot, local.on_virtual_interface, local.info.component_id)
}

/// Agent ties the rest of the crate together: candidate gathering, pairing,
/// the check scheduler and nomination, and the data plane, behind the
/// external surface Section 6 names.
pub struct Agent {
    state: AsyncMutex<AgentState>,
    role: AsyncMutex<Role>,
    tie_breaker: u64,

    local_ufrag: String,
    local_password: String,
    remote_ufrag: AsyncMutex<Option<String>>,
    remote_password: AsyncMutex<Option<String>>,

    local_features: AsyncMutex<FeatureFlags>,
    remote_features: AsyncMutex<FeatureFlags>,

    component_count: AsyncMutex<usize>,
    local_addresses: AsyncMutex<Vec<LocalAddress>>,
    external_addresses: AsyncMutex<HashMap<TransportAddress, TransportAddress>>,
    discoverer: AsyncMutex<Option<Arc<dyn StunDiscoverer>>>,

    components: AsyncMutex<Vec<ComponentRuntime>>,
    remote_candidates: AsyncMutex<Vec<CandidateInfo>>,
    remote_gathering_complete: AsyncMutex<bool>,

    port_reserver: Arc<PortReserver>,

    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: AsyncMutex<mpsc::UnboundedReceiver<Signal>>,

    start_time: AsyncMutex<Option<Instant>>,
    ice_finished: AtomicBool,
    tick_cancel: AsyncMutex<Option<mpsc::Sender<()>>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Arc::new(Agent {
            state: AsyncMutex::new(AgentState::Stopped),
            role: AsyncMutex::new(Role::Unspecified),
            tie_breaker: crate::rand::generate_tie_breaker(),
            local_ufrag: generate_ufrag(),
            local_password: generate_pwd(),
            remote_ufrag: AsyncMutex::new(None),
            remote_password: AsyncMutex::new(None),
            local_features: AsyncMutex::new(FeatureFlags::empty()),
            remote_features: AsyncMutex::new(FeatureFlags::empty()),
            component_count: AsyncMutex::new(config.component_count.max(1)),
            local_addresses: AsyncMutex::new(config.local_addresses),
            external_addresses: AsyncMutex::new(config.external_addresses),
            discoverer: AsyncMutex::new(None),
            components: AsyncMutex::new(Vec::new()),
            remote_candidates: AsyncMutex::new(Vec::new()),
            remote_gathering_complete: AsyncMutex::new(false),
            port_reserver: PortReserver::new(),
            signal_tx,
            signal_rx: AsyncMutex::new(signal_rx),
            start_time: AsyncMutex::new(None),
            ice_finished: AtomicBool::new(false),
            tick_cancel: AsyncMutex::new(None),
        })
    }

    pub fn local_ufrag(&self) -> &str {
        &self.local_ufrag
    }

    pub fn local_password(&self) -> &str {
        &self.local_password
    }

    pub async fn set_local_addresses(&self, addrs: Vec<LocalAddress>) {
        *self.local_addresses.lock().await = addrs;
    }

    pub async fn set_external_addresses(&self, map: HashMap<TransportAddress, TransportAddress>) {
        *self.external_addresses.lock().await = map;
    }

    pub async fn set_stun_discoverer(&self, discoverer: Arc<dyn StunDiscoverer>) {
        *self.discoverer.lock().await = Some(discoverer);
    }

    pub async fn set_component_count(&self, n: usize) {
        *self.component_count.lock().await = n.max(1);
    }

    pub async fn set_local_features(&self, flags: FeatureFlags) {
        *self.local_features.lock().await = flags;
    }

    pub async fn set_remote_features(&self, flags: FeatureFlags) {
        *self.remote_features.lock().await = flags;
    }

    pub async fn set_remote_credentials(&self, ufrag: String, password: String) -> Result<()> {
        if ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if password.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }
        *self.remote_ufrag.lock().await = Some(ufrag);
        *self.remote_password.lock().await = Some(password);
        Ok(())
    }

    pub async fn set_remote_gathering_complete(&self) {
        *self.remote_gathering_complete.lock().await = true;
    }

    /// Adds remote candidates and immediately (re-)pairs them against every
    /// local candidate known so far for the matching component, so trickled
    /// candidates are usable the moment they arrive.
    pub async fn add_remote_candidates(&self, candidates: Vec<CandidateInfo>) -> Result<()> {
        let mut components = self.components.lock().await;
        if components.is_empty() {
            return Err(Error::ErrUnknownComponent);
        }
        let role = *self.role.lock().await;

        let mut remotes = self.remote_candidates.lock().await;
        for c in &candidates {
            remotes.push(c.clone());
        }

        let total = components.len();
        for rt in components.iter_mut() {
            let locals: Vec<CandidateInfo> = rt.locals.iter().map(|l| l.info.clone()).collect();
            let component_remotes: Vec<CandidateInfo> = candidates
                .iter()
                .filter(|c| c.component_id == rt.component.id)
                .cloned()
                .collect();
            if component_remotes.is_empty() {
                continue;
            }
            pairing::pair_candidates(&locals, &component_remotes, role, &mut rt.component.checklist, total);
        }
        Ok(())
    }

    /// Starts the agent: binds local sockets, gathers host candidates, and
    /// drains whatever the STUN discoverer reports, per Sections 4.4-4.6.
    pub async fn start(self: &Arc<Self>, role: Role) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != AgentState::Stopped {
                return Err(Error::ErrMultipleStart);
            }
            *state = AgentState::Starting;
        }
        *self.role.lock().await = role;
        let _ = self.signal_tx.send(Signal::Started);

        let mut addrs = self.local_addresses.lock().await.clone();
        if addrs.is_empty() {
            let _ = self.signal_tx.send(Signal::Error(ErrorKind::Bind));
            return Err(Error::ErrNoLocalAddresses);
        }
        sort_for_gathering(&mut addrs);
        let component_count = *self.component_count.lock().await;

        let mut components: Vec<ComponentRuntime> = (1..=component_count as u8)
            .map(ComponentRuntime::new)
            .collect();

        self.gather_host_candidates(&addrs, &mut components).await?;

        let mut ready_candidates = Vec::new();
        for rt in &components {
            ready_candidates.extend(rt.locals.iter().map(|l| l.info.clone()));
        }
        let _ = self
            .signal_tx
            .send(Signal::LocalCandidatesReady(ready_candidates));

        if let Some(discoverer) = self.discoverer.lock().await.clone() {
            self.gather_from_discoverer(discoverer, &addrs, &mut components)
                .await;
        }

        *self.components.lock().await = components;
        let _ = self.signal_tx.send(Signal::LocalGatheringComplete);
        *self.state.lock().await = AgentState::Started;
        Ok(())
    }

    async fn gather_host_candidates(
        &self,
        addrs: &[LocalAddress],
        components: &mut [ComponentRuntime],
    ) -> Result<()> {
        for addr in addrs {
            let reserved = self
                .port_reserver
                .reserve(addr.ip, components.len())
                .await?;
            if reserved == 0 {
                continue;
            }
            for (ordinal, rt) in components.iter_mut().take(reserved).enumerate() {
                let socket = self.port_reserver.take(addr.ip).await?;
                let local_addr: SocketAddr = socket
                    .local_addr()
                    .map_err(Error::Io)?;
                let transport_addr = TransportAddress::from(local_addr);

                let pool = TransactionPool::new();
                let conn: Arc<UdpSocket> = Arc::new(socket);
                let transport = Arc::new(LocalTransport::new(conn.clone(), pool.clone(), None, true));
                transport.spawn_read_loop().await;

                let type_pref = CandidateType::Host.type_preference(addr.interface_type.is_virtual());
                let priority = default_priority(
                    type_pref,
                    local_preference(ordinal, addrs.len()),
                    rt.component.id,
                );
                let info = CandidateInfo {
                    id: crate::rand::generate_cand_id(),
                    candidate_type: CandidateType::Host,
                    priority,
                    component_id: rt.component.id,
                    foundation: CandidateInfo::compute_foundation(
                        CandidateType::Host,
                        &addr.ip,
                        None,
                        "udp",
                    ),
                    address: transport_addr,
                    base_address: transport_addr,
                    related_address: None,
                    network_index: ordinal as u32,
                    opaque_id: 0,
                };

                let transport_index = rt.transports.len();
                rt.direct_conns.push(conn);
                rt.transports.push(transport);
                rt.pools.push(pool);
                rt.locals.push(LocalCandidate {
                    info,
                    transport_index,
                    path: Path::Direct,
                    on_virtual_interface: addr.interface_type.is_virtual(),
                });
            }
        }
        Ok(())
    }

    /// Drains the STUN discoverer's signal stream, running a Binding
    /// Client probe for plain STUN services and a TURN allocation for
    /// relay-flagged ones, against the first transport of each component
    /// (Section 4.4/4.6).
    async fn gather_from_discoverer(
        &self,
        discoverer: Arc<dyn StunDiscoverer>,
        addrs: &[LocalAddress],
        components: &mut [ComponentRuntime],
    ) {
        let local_ip = match addrs.first() {
            Some(a) => a.ip,
            None => return,
        };

        while discoverer.is_discovering() {
            match discoverer.next_signal().await {
                Some(DiscovererSignal::ServiceAdded(service)) => {
                    self.gather_one_service(&service, local_ip, components).await;
                }
                Some(DiscovererSignal::ServiceModified(service)) => {
                    self.gather_one_service(&service, local_ip, components).await;
                }
                Some(DiscovererSignal::ServiceRemoved(_)) => {}
                Some(DiscovererSignal::DiscoFinished) | None => break,
            }
        }
    }

    async fn gather_one_service(
        &self,
        service: &Service,
        local_ip: std::net::IpAddr,
        components: &mut [ComponentRuntime],
    ) {
        let host = service
            .addresses_v4
            .first()
            .or_else(|| service.addresses_v6.first())
            .copied()
            .unwrap_or(local_ip);
        let server_addr = SocketAddr::new(host, service.port);

        for rt in components.iter_mut() {
            if rt.transports.is_empty() {
                continue;
            }
            if service.is_relay() {
                let client = TurnAllocateClient {
                    turn_server_addr: server_addr,
                    stun_server_configured: false,
                    username: service.username.clone(),
                    password: service.password.clone(),
                    realm: String::new(),
                    local_ip,
                };
                if let Ok(allocation) = client.allocate().await {
                    let transport_index = 0;
                    let relayed_conn: Arc<dyn Conn + Send + Sync> = Arc::from(allocation.relayed_conn);
                    // Stop the old transport's read loop before swapping it
                    // out: both it and `rebuilt` share the same direct-path
                    // conn, and two tasks racing `recv_from` on one socket
                    // would scatter datagrams between them at random.
                    rt.transports[transport_index].stop().await;
                    let rebuilt = Arc::new(LocalTransport::new(
                        rt.direct_conns[transport_index].clone(),
                        rt.pools[transport_index].clone(),
                        Some(relayed_conn),
                        true,
                    ));
                    rebuilt.register_service(server_addr).await;
                    rebuilt.spawn_read_loop().await;
                    rt.transports[transport_index] = rebuilt;
                    let type_pref = CandidateType::Relayed.type_preference(false);
                    let relayed_priority =
                        default_priority(type_pref, 65535, rt.component.id);
                    let relayed_info = CandidateInfo {
                        id: crate::rand::generate_cand_id(),
                        candidate_type: CandidateType::Relayed,
                        priority: relayed_priority,
                        component_id: rt.component.id,
                        foundation: CandidateInfo::compute_foundation(
                            CandidateType::Relayed,
                            &host,
                            Some(&host),
                            "udp",
                        ),
                        address: allocation.relayed_address,
                        base_address: allocation.relayed_address,
                        related_address: None,
                        network_index: 0,
                        opaque_id: 0,
                    };
                    rt.locals.push(LocalCandidate {
                        info: relayed_info,
                        transport_index,
                        path: Path::Relayed,
                        on_virtual_interface: false,
                    });

                    if let Some(srflx) = allocation.server_reflexive_address {
                        let srflx_pref = CandidateType::ServerReflexive.type_preference(false);
                        let srflx_priority = default_priority(srflx_pref, 65535, rt.component.id);
                        rt.locals.push(LocalCandidate {
                            info: CandidateInfo {
                                id: crate::rand::generate_cand_id(),
                                candidate_type: CandidateType::ServerReflexive,
                                priority: srflx_priority,
                                component_id: rt.component.id,
                                foundation: CandidateInfo::compute_foundation(
                                    CandidateType::ServerReflexive,
                                    &host,
                                    Some(&host),
                                    "udp",
                                ),
                                address: srflx,
                                base_address: rt.locals[0].info.base_address,
                                related_address: None,
                                network_index: 0,
                                opaque_id: 0,
                            },
                            transport_index,
                            path: Path::Direct,
                            on_virtual_interface: false,
                        });
                    }
                }
            } else {
                let transport = rt.transports[0].clone();
                let pool = rt.pools[0].clone();
                transport.register_service(server_addr).await;
                if let Ok(reflexive) = discover_reflexive_address(&pool, transport.as_conn(), server_addr).await {
                    let base = rt.locals[0].info.base_address;
                    let srflx_pref = CandidateType::ServerReflexive.type_preference(false);
                    let srflx_priority = default_priority(srflx_pref, 65535, rt.component.id);
                    rt.locals.push(LocalCandidate {
                        info: CandidateInfo {
                            id: crate::rand::generate_cand_id(),
                            candidate_type: CandidateType::ServerReflexive,
                            priority: srflx_priority,
                            component_id: rt.component.id,
                            foundation: CandidateInfo::compute_foundation(
                                CandidateType::ServerReflexive,
                                &host,
                                Some(&host),
                                "udp",
                            ),
                            address: reflexive,
                            base_address: base,
                            related_address: None,
                            network_index: 0,
                            opaque_id: 0,
                        },
                        transport_index: 0,
                        path: Path::Direct,
                        on_virtual_interface: false,
                    });
                }
            }
        }
    }

    /// Begins the Check Phase: pairs whatever remote candidates have
    /// already arrived and spawns the scheduler tick.
    pub async fn start_checks(self: &Arc<Self>) -> Result<()> {
        if self.remote_ufrag.lock().await.is_none() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if self.remote_password.lock().await.is_none() {
            return Err(Error::ErrRemotePwdEmpty);
        }

        {
            let mut state = self.state.lock().await;
            *state = AgentState::Active;
        }
        *self.start_time.lock().await = Some(Instant::now());

        let role = *self.role.lock().await;
        let remotes = self.remote_candidates.lock().await.clone();
        let mut peer_stun_targets = Vec::new();
        {
            let mut components = self.components.lock().await;
            if components.is_empty() {
                return Err(Error::ErrNoCandidatePairs);
            }
            let total = components.len();
            for (comp_idx, rt) in components.iter_mut().enumerate() {
                let locals: Vec<CandidateInfo> = rt.locals.iter().map(|l| l.info.clone()).collect();
                let component_remotes: Vec<CandidateInfo> = remotes
                    .iter()
                    .filter(|c| c.component_id == rt.component.id)
                    .cloned()
                    .collect();
                pairing::pair_candidates(&locals, &component_remotes, role, &mut rt.component.checklist, total);

                // Unfreeze exactly one pair per foundation (the
                // highest-priority one, since the checklist is kept sorted
                // by priority descending): RFC 8445 Section 6.1.2.6.
                let mut seen_foundations = std::collections::HashSet::new();
                for pair in rt.component.checklist.pairs_mut() {
                    if seen_foundations.insert(pair.foundation_pair.0.clone()) {
                        pair.state = CandidatePairState::Waiting;
                    }
                }

                for (transport_index, transport) in rt.transports.iter().enumerate() {
                    peer_stun_targets.push((comp_idx, transport_index, transport.clone()));
                }
            }
        }

        // Drains each transport's peer-STUN channel (connectivity-check
        // traffic from the remote peer that the Transaction Pool didn't
        // claim) into the Responder path, one task per transport.
        for (comp_idx, transport_index, transport) in peer_stun_targets {
            if let Some(mut rx) = transport.take_peer_stun_rx().await {
                let agent = self.clone();
                tokio::spawn(async move {
                    while let Some((from, bytes)) = rx.recv().await {
                        agent.handle_peer_stun(comp_idx, transport_index, from, bytes).await;
                    }
                });
            }
        }

        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);
        *self.tick_cancel.lock().await = Some(cancel_tx);

        let agent = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if agent.tick().await {
                            break;
                        }
                    }
                    _ = cancel_rx.recv() => break,
                }
            }
        });

        Ok(())
    }

    /// Runs one scheduler tick across every component. Returns true once
    /// the agent has transitioned to Stopping (the caller's tick loop then
    /// exits, since `stop()` already owns the cancellation path).
    async fn tick(self: &Arc<Self>) -> bool {
        if *self.state.lock().await == AgentState::Stopping {
            return true;
        }

        let now = match *self.start_time.lock().await {
            Some(t) => t.elapsed(),
            None => Duration::from_secs(0),
        };
        let role = *self.role.lock().await;
        let remote_ufrag = self.remote_ufrag.lock().await.clone().unwrap_or_default();
        let remote_password = self.remote_password.lock().await.clone().unwrap_or_default();
        let local_features = *self.local_features.lock().await;
        let remote_gathering_complete = *self.remote_gathering_complete.lock().await;

        let mut components = self.components.lock().await;
        let mut disconnected = false;
        let mut newly_ready = Vec::new();

        for rt in components.iter_mut() {
            if rt.component.stopped || rt.component.is_ready() {
                continue;
            }

            if let Some(idx) = scheduler::next_check(&mut rt.component) {
                let final_nomination = rt
                    .component
                    .checklist
                    .pair(idx)
                    .map(|p| p.final_nomination)
                    .unwrap_or(false);
                let include_use_candidate = role == Role::Controlling
                    && (local_features.contains(FeatureFlags::AGGRESSIVE_NOMINATION) || final_nomination);

                let candidate_id = rt.component.checklist.pair(idx).map(|p| p.local.id);
                let resolved = candidate_id
                    .and_then(|id| resolve_conn_and_pool(&rt.transports, &rt.pools, &rt.locals, id));
                let check_priority = candidate_id
                    .map(|id| prflx_check_priority(&rt.locals, id))
                    .unwrap_or(0);

                if let Some((conn, pool)) = resolved {
                    let mut locals: Vec<CandidateInfo> = rt.locals.iter().map(|l| l.info.clone()).collect();
                    let outcome = scheduler::run_check(
                        &pool,
                        conn,
                        &mut rt.component,
                        idx,
                        role,
                        self.tie_breaker,
                        include_use_candidate,
                        check_priority,
                        &mut locals,
                        &self.local_ufrag,
                        &remote_ufrag,
                        &remote_password,
                    )
                    .await;

                    match outcome {
                        scheduler::CheckOutcome::Valid => rt.component.arm_nomination_if_needed(now),
                        scheduler::CheckOutcome::Nominated => {
                            rt.component.arm_nomination_if_needed(now);
                            // The succeeded pair may not be `idx` itself: a
                            // mismatched mapped address makes `run_check`
                            // resolve against a synthesized peer-reflexive
                            // pair instead, so the actual winner is
                            // whatever the valid-list now ranks highest.
                            let nominated_idx =
                                rt.component.checklist.highest_priority_valid().unwrap_or(idx);
                            if role == Role::Controlling
                                && !local_features.contains(FeatureFlags::AGGRESSIVE_NOMINATION)
                            {
                                nomination::finalize_selection(&mut rt.component, nominated_idx);
                            } else if role == Role::Controlled && rt.component.selected_pair.is_none() {
                                rt.component.selected_pair = Some(nominated_idx);
                            }
                        }
                        scheduler::CheckOutcome::Failed => {}
                        scheduler::CheckOutcome::SessionFailed => disconnected = true,
                    }
                }
            }

            if role == Role::Controlling {
                if local_features.contains(FeatureFlags::AGGRESSIVE_NOMINATION) {
                    nomination::maybe_finalize_aggressive(&mut rt.component, now);
                } else {
                    nomination::maybe_arm_ordinary_nomination(&mut rt.component, now, remote_gathering_complete);
                }
            } else if local_features.contains(FeatureFlags::AGGRESSIVE_NOMINATION) {
                nomination::maybe_finalize_aggressive(&mut rt.component, now);
            }

            if rt.component.is_ready() && !rt.signalled_ready {
                rt.signalled_ready = true;
                newly_ready.push(rt.component.id);
            }
        }

        let all_ready = !components.is_empty() && components.iter().all(|rt| rt.component.is_ready());
        let pac_expired = now >= PAC_TIMEOUT && !all_ready;
        drop(components);

        for id in newly_ready {
            let _ = self.signal_tx.send(Signal::ComponentReady(id));
        }
        if all_ready && !self.ice_finished.swap(true, Ordering::SeqCst) {
            let _ = self.signal_tx.send(Signal::ReadyToSendMedia);
            let _ = self.signal_tx.send(Signal::IceFinished);
        }

        if disconnected {
            let _ = self.signal_tx.send(Signal::Error(ErrorKind::Disconnected));
            self.begin_stop().await;
            return true;
        }
        if pac_expired {
            let _ = self.signal_tx.send(Signal::Error(ErrorKind::Generic));
            self.begin_stop().await;
            return true;
        }
        false
    }

    /// Handles one inbound datagram that parsed as STUN but wasn't claimed
    /// by the transport's Transaction Pool and didn't come from a known
    /// STUN/TURN service: the remote peer's own connectivity-check traffic
    /// (Section 4.7's Responder side). Validates and answers Binding
    /// Requests, learning peer-reflexive remote candidates and queuing
    /// triggered checks along the way; anything else (a stray response, a
    /// request with the wrong credentials) is dropped.
    async fn handle_peer_stun(
        self: &Arc<Self>,
        comp_idx: usize,
        transport_index: usize,
        from: SocketAddr,
        bytes: Vec<u8>,
    ) {
        let mut request = stun::message::Message::new();
        if request.unmarshal_binary(&bytes).is_err() {
            return;
        }

        let role = *self.role.lock().await;
        let remote_ufrag = self.remote_ufrag.lock().await.clone().unwrap_or_default();

        let mut components = self.components.lock().await;
        let Some(rt) = components.get_mut(comp_idx) else {
            return;
        };
        let local = rt
            .locals
            .iter()
            .find(|l| l.transport_index == transport_index && l.path == Path::Direct)
            .map(|l| l.info.clone());
        let Some(local) = local else {
            return;
        };
        let Some(transport) = rt.transports.get(transport_index).cloned() else {
            return;
        };

        let outcome = {
            let mut remotes = self.remote_candidates.lock().await;
            responder::handle_request(
                &mut rt.component,
                &mut remotes,
                &local,
                &self.local_ufrag,
                &self.local_password,
                &remote_ufrag,
                role,
                from,
                request,
            )
        };
        drop(components);

        if let responder::Handled::Reply(response_bytes) = outcome {
            let _ = transport.write(Path::Direct, &response_bytes, from.into()).await;
        }
    }

    /// Writes one datagram on `component_index`'s selected pair (or any
    /// valid pair, if NotNominatedData is set). Writes on a non-ready
    /// component are silently dropped, per Section 7's user-visible
    /// behaviour.
    pub async fn write_datagram(&self, component_index: usize, bytes: &[u8]) -> Result<()> {
        let not_nominated_ok = self
            .local_features
            .lock()
            .await
            .contains(FeatureFlags::NOT_NOMINATED_DATA);

        let components = self.components.lock().await;
        let rt = components
            .get(component_index)
            .ok_or(Error::ErrInvalidComponent(component_index))?;

        let pair_idx = rt
            .component
            .selected_pair
            .or_else(|| if not_nominated_ok { rt.component.checklist.highest_priority_valid() } else { None });

        let Some(idx) = pair_idx else {
            log::debug!("write on non-ready component {component_index} dropped");
            return Ok(());
        };
        let pair = match rt.component.checklist.pair(idx) {
            Some(p) => p,
            None => return Ok(()),
        };
        let local = rt.locals.iter().find(|l| l.info.id == pair.local.id);
        let (transport_index, path) = match local {
            Some(l) => (l.transport_index, l.path),
            None => return Ok(()),
        };
        let transport = &rt.transports[transport_index];
        let dest = pair.remote.address;

        let n = data::write_datagram(transport, path, bytes, dest)
            .await
            .map_err(Error::Io)?;
        let _ = self
            .signal_tx
            .send(Signal::DatagramsWritten(rt.component.id, n));
        Ok(())
    }

    pub async fn read_datagram(&self, component_index: usize, buf: &mut [u8]) -> Result<usize> {
        let components = self.components.lock().await;
        let rt = components
            .get(component_index)
            .ok_or(Error::ErrInvalidComponent(component_index))?;
        let transport = rt
            .transports
            .first()
            .ok_or(Error::ErrInvalidComponent(component_index))?
            .clone();
        drop(components);
        data::read_datagram(&transport, buf).await.map_err(Error::Io)
    }

    /// Always false: both data-plane queues are drained eagerly as
    /// datagrams arrive, so there is never a distinct "pending" state to
    /// report beyond what a `read_datagram` call itself would tell you.
    pub async fn has_pending_datagrams(&self, _component_index: usize) -> bool {
        false
    }

    pub async fn flag_component_as_low_overhead(&self, component_index: usize) {
        let mut components = self.components.lock().await;
        if let Some(rt) = components.get_mut(component_index) {
            rt.component.flag_low_overhead();
        }
    }

    pub async fn recv_signal(&self) -> Option<Signal> {
        self.signal_rx.lock().await.recv().await
    }

    async fn begin_stop(&self) {
        *self.state.lock().await = AgentState::Stopping;
        if let Some(cancel) = self.tick_cancel.lock().await.take() {
            let _ = cancel.send(()).await;
        }
    }

    /// Cancels timers and the tick, closes every transport (borrowed
    /// sockets go back to the port reserver), and emits `stopped` last, per
    /// Section 5's cancellation sequence.
    pub async fn stop(&self) {
        self.begin_stop().await;

        let mut components = self.components.lock().await;
        for rt in components.iter_mut() {
            rt.component.stopped = true;
            let mut borrowed = vec![false; rt.transports.len()];
            for (i, transport) in rt.transports.iter().enumerate() {
                borrowed[i] = transport.stop().await;
            }
            // transport.stop() already joined its read loop(s), so the only
            // strong reference left on a borrowed conn's allocation is the
            // one in direct_conns below, once this transport Arc is dropped.
            rt.transports.clear();

            for (i, conn) in rt.direct_conns.drain(..).enumerate() {
                if !borrowed.get(i).copied().unwrap_or(false) {
                    continue;
                }
                if let Ok(socket) = Arc::try_unwrap(conn) {
                    if let Ok(addr) = socket.local_addr() {
                        self.port_reserver.give_back(addr.ip(), socket).await;
                    }
                }
            }
        }
        components.clear();

        *self.state.lock().await = AgentState::Stopped;
        let _ = self.signal_tx.send(Signal::Stopped);
    }
}

#[cfg(test)]
mod agent_test {
    use super::*;
    use crate::network_type::InterfaceType;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_local_preference_prefers_earlier_addresses() {
        assert!(local_preference(0, 3) > local_preference(1, 3));
        assert!(local_preference(1, 3) > local_preference(2, 3));
        assert_eq!(local_preference(0, 1), 65535);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_local_addresses() {
        let agent = Agent::new(AgentConfig {
            component_count: 1,
            local_addresses: vec![],
            external_addresses: HashMap::new(),
        });
        let err = agent.start(Role::Controlling).await.unwrap_err();
        assert!(matches!(err, Error::ErrNoLocalAddresses));
    }

    #[tokio::test]
    async fn test_start_gathers_one_host_candidate_per_component() {
        let agent = Agent::new(AgentConfig {
            component_count: 2,
            local_addresses: vec![LocalAddress::new(
                IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
                1,
                InterfaceType::Ethernet,
            )],
            external_addresses: HashMap::new(),
        });
        agent.start(Role::Controlling).await.unwrap();

        let components = agent.components.lock().await;
        assert_eq!(components.len(), 2);
        for rt in components.iter() {
            assert_eq!(rt.locals.len(), 1);
            assert_eq!(rt.locals[0].info.candidate_type, CandidateType::Host);
        }
    }

    #[tokio::test]
    async fn test_stop_returns_borrowed_sockets_to_the_port_reserver() {
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let agent = Agent::new(AgentConfig {
            component_count: 2,
            local_addresses: vec![LocalAddress::new(ip, 1, InterfaceType::Ethernet)],
            external_addresses: HashMap::new(),
        });
        agent.start(Role::Controlling).await.unwrap();

        // Both host candidates borrowed a socket out of the reserver.
        assert_eq!(agent.port_reserver.available(ip).await, 0);

        agent.stop().await;

        // stop() joins each transport's read loop, reclaims the borrowed
        // conn via Arc::try_unwrap, and gives it back.
        assert_eq!(agent.port_reserver.available(ip).await, 2);
    }

    #[tokio::test]
    async fn test_set_remote_credentials_rejects_empty() {
        let agent = Agent::new(AgentConfig::default());
        assert!(matches!(
            agent.set_remote_credentials(String::new(), "x".into()).await,
            Err(Error::ErrRemoteUfragEmpty)
        ));
        assert!(matches!(
            agent.set_remote_credentials("x".into(), String::new()).await,
            Err(Error::ErrRemotePwdEmpty)
        ));
    }
}
