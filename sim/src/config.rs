//! ConfigFacade: topology loading (specification §4.8), expanded from the
//! distilled specification's "external" collaborator into thin, real,
//! tested glue -- this crate's only sanctioned way to build a
//! [`crate::fabric::Fabric`]/[`crate::cluster::Cluster`] pair.
//!
//! Grounded on `examples/original_source/cluster.py`'s topology loader for
//! the YAML node-kind shape (`worker`/`router`/`storage`, each keyed by
//! name under a `topology` map) and on the corpus's use of `serde`/
//! `serde_yaml` for config parsing.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::Deserialize;

use chainsim_net::subnet_of;

use crate::cache::{EvictionPolicy, LatencyModel, SerializationPolicy};
use crate::cluster::Cluster;
use crate::error::ConfigError;
use crate::fabric::{Fabric, FabricHandle};
use crate::scheduler::Policy;

/// A worker node's `cache` sub-block.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSpec {
    /// Reserved for a future eviction-policy choice; the core simulator
    /// only implements `None` (specification §9), so this is parsed but
    /// otherwise unused.
    #[serde(default)]
    pub policy: Option<String>,
    /// The port this worker's cache listens for fetch requests on.
    pub port: u16,
    /// Fixed overhead of this worker's serialization latency model,
    /// seconds. Not part of the distilled specification's YAML shape;
    /// added so `ConfigFacade` is real glue rather than a stub -- defaults
    /// to zero, matching a trace with no measured (de)serialization cost.
    #[serde(default)]
    pub ser_fixed: f64,
    /// Per-byte cost of this worker's serialization latency model.
    #[serde(default)]
    pub ser_per_byte: f64,
    /// Fixed overhead of this worker's deserialization latency model.
    #[serde(default)]
    pub deser_fixed: f64,
    /// Per-byte cost of this worker's deserialization latency model.
    #[serde(default)]
    pub deser_per_byte: f64,
}

/// One node in the `topology` map, tagged by its `type` field
/// (specification §6).
#[derive(Debug, Clone)]
pub enum NodeSpec {
    /// A compute worker: cache, CPU share, and network interface.
    Worker {
        /// This worker's address.
        ip: String,
        /// Outbound link rate, bits/second.
        rate: f64,
        /// Number of executor slots.
        executors: usize,
        /// Memory budget, bytes. Advisory only (specification §9: capacity
        /// is not enforced by the core simulator).
        #[allow(dead_code)]
        memory: u64,
        /// The name of the router this worker's traffic departs through.
        gateway: String,
        /// Optional `ip:port` of a storage node this worker falls back to.
        /// Not wired into the simulated core (specification §9: persistent
        /// misses are treated as a data-placement bug, not a fallback
        /// path); kept for completeness of the parsed topology.
        #[allow(dead_code)]
        storage: Option<String>,
        /// This worker's cache configuration.
        cache: CacheSpec,
    },
    /// A network router.
    Router {
        /// This router's address.
        ip: String,
        /// Number of switch ports.
        ports: usize,
        /// Per-port link rate, bits/second.
        rate: f64,
        /// The name of this router's own gateway, or `"None"` for a root
        /// router.
        gateway: String,
    },
    /// A storage node. Represented in the fabric for topology completeness
    /// but not an active participant in the simulated core (specification
    /// §9).
    Storage {
        /// This storage node's address.
        ip: String,
        /// The port it listens on.
        #[allow(dead_code)]
        port: u16,
        /// Outbound link rate, bits/second.
        rate: f64,
        /// The name of the router this node's traffic departs through.
        gateway: String,
        /// Advisory storage throughput, bytes/second. Not simulated.
        #[allow(dead_code)]
        storage_rate: f64,
        /// Optional path to a metadata CSV. Not read by this crate.
        #[allow(dead_code)]
        metadata: Option<String>,
    },
}

impl NodeSpec {
    fn ip(&self) -> &str {
        match self {
            NodeSpec::Worker { ip, .. } | NodeSpec::Router { ip, .. } | NodeSpec::Storage { ip, .. } => ip,
        }
    }

    fn gateway(&self) -> &str {
        match self {
            NodeSpec::Worker { gateway, .. } | NodeSpec::Router { gateway, .. } | NodeSpec::Storage { gateway, .. } => gateway,
        }
    }

    fn is_router(&self) -> bool {
        matches!(self, NodeSpec::Router { .. })
    }
}

#[derive(Debug, Deserialize)]
struct WorkerFields {
    ip: String,
    rate: f64,
    executors: usize,
    #[serde(default)]
    memory: u64,
    gateway: String,
    #[serde(default)]
    storage: Option<String>,
    cache: CacheSpec,
}

#[derive(Debug, Deserialize)]
struct RouterFields {
    ip: String,
    ports: usize,
    rate: f64,
    gateway: String,
}

#[derive(Debug, Deserialize)]
struct StorageFields {
    ip: String,
    port: u16,
    rate: f64,
    gateway: String,
    storage_rate: f64,
    #[serde(default)]
    metadata: Option<String>,
}

/// The `cluster` block: global serialization policy, scheduling policy,
/// and whether prefetch-NOP injection is enabled (specification §4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSpec {
    /// Name of the cluster-wide serialization policy (`lazy`/`syncwdeser`/
    /// `syncnodeser`).
    pub serialization: String,
    /// Name of the scheduling policy (specification §9).
    pub scheduling: String,
    /// Whether prefetch NOPs are injected ahead of a color change.
    #[serde(default)]
    pub prefetch: bool,
}

/// The `benchmark` block: which trace files to run and where to write
/// results.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkSpec {
    /// Directory containing `.g`/`.json`/`.optimal`/`.colors` trace files.
    pub workloaddir: String,
    /// Base names (without extension) of the workloads to run.
    pub workloads: Vec<String>,
    /// Directory to write per-run logs to. Not otherwise used by this
    /// crate's core (specification's ambient logging goes through
    /// `tracing`), kept for topology-completeness and future use.
    #[allow(dead_code)]
    pub logdir: String,
    /// Path to write the statistics CSV to.
    pub statistics: String,
}

#[derive(Debug, Deserialize)]
struct RawTopologyFile {
    topology: HashMap<String, serde_yaml::Value>,
    cluster: ClusterSpec,
    benchmark: BenchmarkSpec,
}

/// The fully parsed and validated contents of a topology YAML file.
pub struct TopologyFile {
    /// Every node, keyed by its name in the YAML map.
    pub nodes: HashMap<String, NodeSpec>,
    /// The `cluster` block.
    pub cluster: ClusterSpec,
    /// The `benchmark` block.
    pub benchmark: BenchmarkSpec,
}

impl TopologyFile {
    /// Parses and validates `yaml`, rejecting an unrecognized node `type`
    /// with a precise [`ConfigError::UnknownNodeType`] rather than a
    /// generic parse failure.
    pub fn parse(yaml: &str) -> Result<TopologyFile, ConfigError> {
        let raw: RawTopologyFile = serde_yaml::from_str(yaml)?;
        let mut nodes = HashMap::with_capacity(raw.topology.len());
        for (name, value) in raw.topology {
            let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let node = match kind.as_str() {
                "worker" => {
                    let f: WorkerFields = serde_yaml::from_value(value)?;
                    NodeSpec::Worker {
                        ip: f.ip,
                        rate: f.rate,
                        executors: f.executors,
                        memory: f.memory,
                        gateway: f.gateway,
                        storage: f.storage,
                        cache: f.cache,
                    }
                }
                "router" => {
                    let f: RouterFields = serde_yaml::from_value(value)?;
                    NodeSpec::Router { ip: f.ip, ports: f.ports, rate: f.rate, gateway: f.gateway }
                }
                "storage" => {
                    let f: StorageFields = serde_yaml::from_value(value)?;
                    NodeSpec::Storage {
                        ip: f.ip,
                        port: f.port,
                        rate: f.rate,
                        gateway: f.gateway,
                        storage_rate: f.storage_rate,
                        metadata: f.metadata,
                    }
                }
                other => return Err(ConfigError::UnknownNodeType { name, kind: other.to_string() }),
            };
            nodes.insert(name, node);
        }
        for (name, node) in &nodes {
            if node.gateway() != "None" && !nodes.contains_key(node.gateway()) {
                return Err(ConfigError::MissingRoute { name: name.clone(), gateway: node.gateway().to_string() });
            }
        }
        Ok(TopologyFile { nodes, cluster: raw.cluster, benchmark: raw.benchmark })
    }

    /// Parses `cluster.scheduling` into a [`Policy`].
    pub fn scheduling_policy(&self) -> Result<Policy, ConfigError> {
        Policy::parse(&self.cluster.scheduling).map_err(|_| ConfigError::UnsupportedPolicy(self.cluster.scheduling.clone()))
    }

    /// Parses `cluster.serialization` into a [`SerializationPolicy`].
    pub fn serialization_policy(&self) -> Result<SerializationPolicy, ConfigError> {
        parse_serialization_policy(&self.cluster.serialization)
    }
}

/// Parses a `cluster.serialization` config value.
pub fn parse_serialization_policy(name: &str) -> Result<SerializationPolicy, ConfigError> {
    match name {
        "lazy" => Ok(SerializationPolicy::Lazy),
        "syncwdeser" => Ok(SerializationPolicy::SyncWDeser),
        "syncnodeser" => Ok(SerializationPolicy::SyncNoDeser),
        other => Err(ConfigError::UnsupportedSerialization(other.to_string())),
    }
}

/// The result of [`build_cluster`]: a ready-to-use fabric/cluster pair plus
/// everything else the CLI needs to admit workloads.
pub struct BuiltTopology {
    /// The wired network fabric.
    pub fabric: FabricHandle,
    /// The wired cluster.
    pub cluster: Rc<Cluster>,
    /// The resolved scheduling policy.
    pub policy: Policy,
    /// Whether prefetch-NOP injection is enabled.
    pub prefetch: bool,
}

/// Builds a [`Fabric`] and [`Cluster`] from a validated [`TopologyFile`].
///
/// Wiring proceeds in two passes. First, every router and nic is created
/// and connected to its declared gateway, forming a tree (a worker or
/// storage node connects a nic port; a child router connects an upward
/// default-gateway port to its parent, and the parent gets a matching
/// downward port to the child). Second, every router is given a subnet
/// route for every address reachable *through* a child that is not itself
/// directly attached -- necessary because `chainsim_net::Router::route`
/// only consults its subnet table when no port is bound to the exact
/// destination IP (`examples/TimelyDataflow-timely-dataflow` has no
/// analogous multi-hop routing concept to ground this on; the shape
/// instead follows `original_source/cluster.py`'s flat single-switch
/// topologies generalized to the tree the YAML schema actually allows).
pub fn build_cluster(doc: &TopologyFile) -> Result<BuiltTopology, ConfigError> {
    let fabric = Fabric::new();
    let mut cache_ports = HashMap::new();

    for node in doc.nodes.values() {
        match node {
            NodeSpec::Router { ip, ports, rate, .. } => fabric.borrow_mut().add_router(ip.clone(), *ports, *rate),
            NodeSpec::Worker { ip, rate, .. } | NodeSpec::Storage { ip, rate, .. } => {
                fabric.borrow_mut().add_nic(ip.clone(), *rate)
            }
        }
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, node) in &doc.nodes {
        if node.gateway() != "None" {
            children.entry(node.gateway()).or_default().push(name);
        }
    }

    for (router_name, kids) in &children {
        let router_ip = doc.nodes[*router_name].ip();
        for &child_name in kids {
            let child = &doc.nodes[child_name];
            if child.is_router() {
                fabric.borrow_mut().connect_routers(router_ip, child.ip(), false);
                fabric.borrow_mut().connect_routers(child.ip(), router_ip, true);
            } else {
                fabric.borrow_mut().connect_nic(child.ip(), router_ip, false);
            }
        }
    }

    let served_subnets = served_subnets_by_name(doc, &children);
    for (router_name, kids) in &children {
        let router_ip = doc.nodes[*router_name].ip().to_string();
        for &child_name in kids {
            let child_ip = doc.nodes[child_name].ip();
            for subnet in &served_subnets[child_name] {
                fabric.borrow_mut().add_subnet_route(&router_ip, subnet.clone(), child_ip);
            }
        }
    }

    for node in doc.nodes.values() {
        if let NodeSpec::Worker { ip, cache, .. } = node {
            cache_ports.insert(ip.clone(), cache.port);
        }
    }

    let mut cluster = Cluster::new(fabric.clone(), cache_ports);
    let serialization_policy = doc.serialization_policy()?;
    for node in doc.nodes.values() {
        if let NodeSpec::Worker { ip, executors, cache, .. } = node {
            cluster.add_worker(
                ip.clone(),
                cache.port,
                cache.port + 1,
                *executors,
                serialization_policy,
                EvictionPolicy::default(),
                LatencyModel { fixed: cache.ser_fixed, per_byte: cache.ser_per_byte },
                LatencyModel { fixed: cache.deser_fixed, per_byte: cache.deser_per_byte },
            );
        }
    }

    let policy = doc.scheduling_policy()?;
    Ok(BuiltTopology { fabric, cluster: Rc::new(cluster), policy, prefetch: doc.cluster.prefetch })
}

/// For every node, the set of subnets (`subnet_of`) reachable in its own
/// subtree (its own subnet plus every descendant's), used to populate
/// subnet routes on ancestors one level up. Topology trees are small
/// (cluster configs, not task DAGs), so plain recursion is fine here
/// unlike `crate::graph::Job::find_cycle`'s explicit-stack DFS.
fn served_subnets_by_name<'a>(doc: &'a TopologyFile, children: &HashMap<&'a str, Vec<&'a str>>) -> HashMap<&'a str, HashSet<String>> {
    let mut memo: HashMap<&str, HashSet<String>> = HashMap::new();
    fn visit<'a>(
        name: &'a str,
        doc: &'a TopologyFile,
        children: &HashMap<&'a str, Vec<&'a str>>,
        memo: &mut HashMap<&'a str, HashSet<String>>,
    ) -> HashSet<String> {
        if let Some(cached) = memo.get(name) {
            return cached.clone();
        }
        let mut set = HashSet::new();
        if let Some(s) = subnet_of(doc.nodes[name].ip()) {
            set.insert(s.to_string());
        }
        if let Some(kids) = children.get(name) {
            for &kid in kids {
                set.extend(visit(kid, doc, children, memo));
            }
        }
        memo.insert(name, set.clone());
        set
    }
    for name in doc.nodes.keys() {
        visit(name, doc, children, &mut memo);
    }
    memo
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
topology:
  root:
    type: router
    ip: "10.0.0.254"
    ports: 4
    rate: 1000000.0
    gateway: "None"
  mid:
    type: router
    ip: "10.0.1.254"
    ports: 4
    rate: 1000000.0
    gateway: root
  w1:
    type: worker
    ip: "10.0.0.1"
    rate: 1000000.0
    executors: 2
    memory: 0
    gateway: root
    cache:
      port: 9000
  w2:
    type: worker
    ip: "10.0.1.1"
    rate: 1000000.0
    executors: 2
    memory: 0
    gateway: mid
    cache:
      port: 9000
cluster:
  serialization: lazy
  scheduling: round_robin
  prefetch: false
benchmark:
  workloaddir: "traces"
  workloads: ["job1"]
  logdir: "logs"
  statistics: "stats.csv"
"#;

    #[test]
    fn parses_all_three_node_kinds() {
        let doc = TopologyFile::parse(YAML).unwrap();
        assert_eq!(doc.nodes.len(), 4);
        assert!(matches!(doc.nodes["root"], NodeSpec::Router { .. }));
        assert!(matches!(doc.nodes["w1"], NodeSpec::Worker { .. }));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let bad = YAML.replace("type: worker", "type: gpu");
        assert!(matches!(TopologyFile::parse(&bad), Err(ConfigError::UnknownNodeType { .. })));
    }

    #[test]
    fn unknown_gateway_is_rejected() {
        let bad = YAML.replace("gateway: mid", "gateway: nonexistent");
        assert!(matches!(TopologyFile::parse(&bad), Err(ConfigError::MissingRoute { .. })));
    }

    #[test]
    fn builds_two_level_topology_with_cross_subnet_routing() {
        let doc = TopologyFile::parse(YAML).unwrap();
        let built = build_cluster(&doc).unwrap();
        assert_eq!(built.cluster.active_workers().len(), 2);
        assert_eq!(built.policy, Policy::RoundRobin);
    }
}
