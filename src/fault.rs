//! In-process TCP fault injection for integration tests.
//!
//! A [`FaultProxy`] owns named routes. Each route listens on a local address and relays every
//! accepted connection to an upstream address. Named [`Fault`]s attached to a route impair the
//! traffic:
//!
//! - `Latency` delays each chunk travelling client → upstream. The active fault set is read per
//!   chunk, so removing a fault affects connections already open.
//! - `Refuse` closes accepted connections before anything is relayed.
//!
//! `toxicity` is the probability that a fault applies to a given connection; the roll happens
//! once per connection and fault.
//!
//! Dropping the proxy (or removing a route) stops its listener and every relayed connection.

use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RELAY_BUFFER: usize = 8 * 1024;
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(10);

/// A network impairment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Delay every upstream chunk by `latency` plus a random `0..=jitter`.
    Latency { latency: Duration, jitter: Duration },
    /// Close connections on accept.
    Refuse,
}

impl Fault {
    /// Fixed latency without jitter.
    pub fn latency(latency: Duration) -> Self {
        Fault::Latency { latency, jitter: Duration::ZERO }
    }
}

/// Misuse of the harness or a failed bind.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("route {route} could not bind {addr}: {source}")]
    Bind {
        route: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} {name:?} is already registered")]
    Duplicate { kind: &'static str, name: String },
    #[error("unknown route {0:?}")]
    UnknownRoute(String),
    #[error("unknown fault {fault:?} on route {route:?}")]
    UnknownFault { route: String, fault: String },
    #[error("toxicity must be within 0.0..=1.0 (got {0})")]
    InvalidToxicity(f64),
}

#[derive(Debug, Clone, Copy)]
struct ActiveFault {
    fault: Fault,
    toxicity: f64,
    /// Distinguishes a fault from a later one re-added under the same name.
    generation: u64,
}

/// Faults of one route, in insertion order.
#[derive(Debug, Clone, Default)]
struct FaultTable(Arc<Mutex<Vec<(String, ActiveFault)>>>);

impl FaultTable {
    fn lock(&self) -> MutexGuard<'_, Vec<(String, ActiveFault)>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<(String, ActiveFault)> {
        self.lock().clone()
    }

    fn remove(&self, name: &str) -> bool {
        self.remove_where(|n, _| n == name)
    }

    fn remove_generation(&self, name: &str, generation: u64) -> bool {
        self.remove_where(|n, a| n == name && a.generation == generation)
    }

    fn remove_where(&self, matches: impl Fn(&str, &ActiveFault) -> bool) -> bool {
        let mut faults = self.lock();
        let before = faults.len();
        faults.retain(|(n, a)| !matches(n.as_str(), a));
        faults.len() != before
    }
}

/// Per-connection toxicity outcomes, keyed by fault name.
#[derive(Debug, Default)]
struct Rolls(HashMap<String, bool>);

impl Rolls {
    fn hit(&mut self, name: &str, toxicity: f64) -> bool {
        if let Some(hit) = self.0.get(name) {
            return *hit;
        }
        let hit = toxicity >= 1.0 || rand::rng().random_bool(toxicity);
        self.0.insert(name.to_string(), hit);
        hit
    }

    fn refused(&mut self, faults: &FaultTable) -> bool {
        faults
            .snapshot()
            .iter()
            .any(|(name, a)| matches!(a.fault, Fault::Refuse) && self.hit(name, a.toxicity))
    }

    fn latency(&mut self, faults: &FaultTable) -> Duration {
        let mut total = Duration::ZERO;
        for (name, active) in faults.snapshot() {
            if let Fault::Latency { latency, jitter } = active.fault {
                if self.hit(&name, active.toxicity) {
                    total += latency + sample_jitter(jitter);
                }
            }
        }
        total
    }
}

fn sample_jitter(jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return Duration::ZERO;
    }
    let max = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::rng().random_range(0..=max))
}

#[derive(Debug)]
struct Route {
    listen: SocketAddr,
    faults: FaultTable,
    shutdown: CancellationToken,
    accept: JoinHandle<()>,
}

impl Route {
    fn stop(&self) {
        self.shutdown.cancel();
        self.accept.abort();
    }
}

/// Named TCP routes with attachable faults.
#[derive(Debug, Default)]
pub struct FaultProxy {
    routes: Mutex<HashMap<String, Route>>,
    shutdown: CancellationToken,
    generations: AtomicU64,
}

impl FaultProxy {
    /// A proxy with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `listen` (port 0 picks a free port) and relay to `upstream`.
    ///
    /// Returns the bound address.
    pub async fn register_route(
        &self,
        name: &str,
        listen: SocketAddr,
        upstream: SocketAddr,
    ) -> Result<SocketAddr, HarnessError> {
        if self.routes().contains_key(name) {
            return Err(HarnessError::Duplicate { kind: "route", name: name.to_string() });
        }

        let listener = TcpListener::bind(listen).await.map_err(|source| HarnessError::Bind {
            route: name.to_string(),
            addr: listen,
            source,
        })?;
        let bound = listener.local_addr().map_err(|source| HarnessError::Bind {
            route: name.to_string(),
            addr: listen,
            source,
        })?;

        let mut routes = self.routes();
        if routes.contains_key(name) {
            return Err(HarnessError::Duplicate { kind: "route", name: name.to_string() });
        }
        let faults = FaultTable::default();
        let shutdown = self.shutdown.child_token();
        let accept = tokio::spawn(accept_loop(
            name.to_string(),
            listener,
            upstream,
            faults.clone(),
            shutdown.clone(),
        ));
        routes.insert(name.to_string(), Route { listen: bound, faults, shutdown, accept });
        tracing::debug!(route = name, listen = %bound, upstream = %upstream, "route registered");
        Ok(bound)
    }

    /// Bound address of a route.
    pub fn route_addr(&self, name: &str) -> Option<SocketAddr> {
        self.routes().get(name).map(|route| route.listen)
    }

    /// Attach `fault` to `route` under `fault_name`.
    ///
    /// `toxicity` (0.0..=1.0) is the chance the fault applies to each new connection.
    pub fn add_fault(
        &self,
        route: &str,
        fault_name: &str,
        fault: Fault,
        toxicity: f64,
    ) -> Result<(), HarnessError> {
        self.insert_fault(route, fault_name, fault, toxicity).map(|_| ())
    }

    /// Add a fault that removes itself after `duration`.
    pub fn add_fault_for(
        &self,
        route: &str,
        fault_name: &str,
        fault: Fault,
        toxicity: f64,
        duration: Duration,
    ) -> Result<(), HarnessError> {
        let (table, generation) = self.insert_fault(route, fault_name, fault, toxicity)?;
        let shutdown = self.shutdown.clone();
        let name = fault_name.to_string();
        let route = route.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    if table.remove_generation(&name, generation) {
                        tracing::debug!(route = %route, fault = %name, "timed fault expired");
                    }
                }
            }
        });
        Ok(())
    }

    /// Detach a fault. Open connections stop seeing its latency at their next chunk.
    pub fn remove_fault(&self, route: &str, fault_name: &str) -> Result<(), HarnessError> {
        let routes = self.routes();
        let entry = routes.get(route).ok_or_else(|| HarnessError::UnknownRoute(route.to_string()))?;
        if entry.faults.remove(fault_name) {
            tracing::debug!(route, fault = fault_name, "fault removed");
            Ok(())
        } else {
            Err(HarnessError::UnknownFault { route: route.to_string(), fault: fault_name.to_string() })
        }
    }

    /// Stop a route's listener and drop its connections.
    pub fn remove_route(&self, name: &str) -> Result<(), HarnessError> {
        let route =
            self.routes().remove(name).ok_or_else(|| HarnessError::UnknownRoute(name.to_string()))?;
        route.stop();
        tracing::debug!(route = name, "route removed");
        Ok(())
    }

    fn insert_fault(
        &self,
        route: &str,
        fault_name: &str,
        fault: Fault,
        toxicity: f64,
    ) -> Result<(FaultTable, u64), HarnessError> {
        if !(0.0..=1.0).contains(&toxicity) {
            return Err(HarnessError::InvalidToxicity(toxicity));
        }
        let routes = self.routes();
        let entry = routes.get(route).ok_or_else(|| HarnessError::UnknownRoute(route.to_string()))?;
        let mut faults = entry.faults.lock();
        if faults.iter().any(|(n, _)| n == fault_name) {
            return Err(HarnessError::Duplicate { kind: "fault", name: fault_name.to_string() });
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        faults.push((fault_name.to_string(), ActiveFault { fault, toxicity, generation }));
        tracing::debug!(route, fault = fault_name, ?fault, toxicity, "fault added");
        Ok((entry.faults.clone(), generation))
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FaultProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for route in self.routes().values() {
            route.stop();
        }
    }
}

async fn accept_loop(
    route: String,
    listener: TcpListener,
    upstream: SocketAddr,
    faults: FaultTable,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let client = match accepted {
            Ok((client, _)) => client,
            Err(e) => {
                tracing::warn!(route = %route, error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                continue;
            }
        };

        let faults = faults.clone();
        let shutdown = shutdown.clone();
        let route = route.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                relayed = relay(client, upstream, faults) => {
                    if let Err(e) = relayed {
                        tracing::debug!(route = %route, error = %e, "connection closed with error");
                    }
                }
            }
        });
    }
}

async fn relay(client: TcpStream, upstream: SocketAddr, faults: FaultTable) -> std::io::Result<()> {
    let mut rolls = Rolls::default();
    if rolls.refused(&faults) {
        return Ok(());
    }

    let server = TcpStream::connect(upstream).await?;
    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();

    tokio::try_join!(
        forward_delayed(client_read, server_write, faults, rolls),
        forward(server_read, client_write),
    )?;
    Ok(())
}

/// client → upstream, delaying each chunk by the active latency faults.
async fn forward_delayed(
    mut from: OwnedReadHalf,
    mut to: OwnedWriteHalf,
    faults: FaultTable,
    mut rolls: Rolls,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; RELAY_BUFFER];
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            return to.shutdown().await;
        }
        let delay = rolls.latency(&faults);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        to.write_all(&buf[..n]).await?;
    }
}

async fn forward(mut from: OwnedReadHalf, mut to: OwnedWriteHalf) -> std::io::Result<()> {
    tokio::io::copy(&mut from, &mut to).await?;
    to.shutdown().await
}
