use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use storage::{AvailableSpace, NodeId};
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{Config, NetworkError, NodeClient, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeState {
    pub id: NodeId,
    pub space: AvailableSpace,
    pub is_online: bool,
}

/// One poll cycle's view. `ranked` is derived from `states` and the two are
/// only ever replaced together.
#[derive(Default)]
struct Snapshot {
    states: HashMap<NodeId, NodeState>,
    ranked: Vec<Arc<dyn NodeClient>>,
}

/// Tracks which storage nodes are reachable and how full they are, and picks
/// nodes for new parts, emptiest first.
pub struct PlacementRegistry {
    clients: Vec<Arc<dyn NodeClient>>,
    snapshot: RwLock<Snapshot>,
    config: Config,
}

impl PlacementRegistry {
    /// Registry over a fixed node set. Nothing is online until the first
    /// `refresh`.
    pub fn new(clients: Vec<Arc<dyn NodeClient>>, config: Config) -> Self {
        let mut seen = HashSet::new();
        let clients = clients
            .into_iter()
            .filter(|client| {
                let fresh = seen.insert(client.id().to_string());
                if !fresh {
                    tracing::warn!(node = %client.id(), "Ignoring duplicate storage node");
                }
                fresh
            })
            .collect();

        Self {
            clients,
            snapshot: RwLock::new(Snapshot::default()),
            config,
        }
    }

    /// Like `new`, but polls every node once before returning.
    pub async fn connect(clients: Vec<Arc<dyn NodeClient>>, config: Config) -> Self {
        let registry = Self::new(clients, config);
        registry.refresh().await;
        registry
    }

    /// One node per part, walking the most-free-first ranking and wrapping
    /// around when there are more parts than online nodes.
    pub async fn servers_for_parts(&self, parts: usize) -> Result<Vec<Arc<dyn NodeClient>>> {
        let snapshot = self.snapshot.read().await;
        if snapshot.ranked.is_empty() {
            return Err(NetworkError::AllNodesOffline);
        }

        Ok((0..parts)
            .map(|n| snapshot.ranked[n % snapshot.ranked.len()].clone())
            .collect())
    }

    /// Resolves recorded node ids back to clients. Every node must be online
    /// as of the last refresh.
    pub async fn store_clients(&self, ids: &[NodeId]) -> Result<Vec<Arc<dyn NodeClient>>> {
        let snapshot = self.snapshot.read().await;

        ids.iter()
            .map(|id| {
                let online = snapshot.states.get(id).is_some_and(|state| state.is_online);
                if !online {
                    return Err(NetworkError::NodeUnavailable(id.clone()));
                }
                self.clients
                    .iter()
                    .find(|client| client.id() == id)
                    .cloned()
                    .ok_or_else(|| NetworkError::NodeUnavailable(id.clone()))
            })
            .collect()
    }

    /// Node states from the last refresh, in configured order.
    pub async fn node_states(&self) -> Vec<NodeState> {
        let snapshot = self.snapshot.read().await;
        self.clients
            .iter()
            .filter_map(|client| snapshot.states.get(client.id()).cloned())
            .collect()
    }

    /// Polls every node for its space and swaps in the new view. A node that
    /// errors or misses the poll deadline is offline until a later cycle sees
    /// it again.
    pub async fn refresh(&self) {
        let polls = self.clients.iter().map(|client| async move {
            let id = client.id().to_string();
            let poll = tokio::time::timeout(self.config.poll_timeout, client.space_report());
            let state = match poll.await {
                Ok(Ok(space)) => NodeState {
                    id,
                    space,
                    is_online: true,
                },
                Ok(Err(e)) => {
                    tracing::warn!(node = %id, "Storage node returned error: {}", e);
                    NodeState {
                        id,
                        space: AvailableSpace::default(),
                        is_online: false,
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        node = %id,
                        timeout = ?self.config.poll_timeout,
                        "Storage node poll timed out"
                    );
                    NodeState {
                        id,
                        space: AvailableSpace::default(),
                        is_online: false,
                    }
                }
            };
            (client.clone(), state)
        });
        let polled = futures::future::join_all(polls).await;

        let mut online: Vec<(Arc<dyn NodeClient>, f64)> = polled
            .iter()
            .filter(|(_, state)| state.is_online)
            .map(|(client, state)| (client.clone(), state.space.headroom()))
            .collect();
        // stable: equal headroom keeps configured order
        online.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let next = Snapshot {
            states: polled
                .into_iter()
                .map(|(_, state)| (state.id.clone(), state))
                .collect(),
            ranked: online.into_iter().map(|(client, _)| client).collect(),
        };
        let online_count = next.ranked.len();

        *self.snapshot.write().await = next;

        tracing::debug!(
            nodes = self.clients.len(),
            online = online_count,
            "Storage node states refreshed"
        );
    }

    /// Refreshes every `refresh_interval` until `shutdown` resolves. An
    /// in-flight poll is abandoned on shutdown.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let period = self.config.refresh_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?period,
            nodes = self.clients.len(),
            "Placement registry refresh loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.refresh() => {}
                    }
                }
            }
        }

        tracing::info!("Placement registry refresh loop stopped");
    }
}
