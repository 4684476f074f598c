//! Session controller: agent registry, callback fan-out, and the run loop.
//!
//! The simulator advances in discrete ticks and pauses after each one to
//! report a batch of events. Every event in a batch is dispatched before
//! the peer is asked to advance further, so callback-side mutations
//! (removing an agent, stopping the run) stay ordered relative to event
//! delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::agent::{Agent, AgentId, AgentKind, AgentState};
use crate::config::ClientConfig;
use crate::event::{AgentEvent, EventError, EventKind, WireEvent};
use crate::geometry::{RaycastHit, Transform, Vector, WeatherState};
use crate::transport::Transport;
use crate::{Error, Result};

/// Callback invoked for a subscribed event.
///
/// Dispatch is synchronous: a handler that blocks stalls the whole run
/// loop. Handlers may freely call back into the [`Simulator`] — remove
/// agents, issue commands, request [`Simulator::stop`].
pub type EventHandler = Arc<dyn Fn(&Simulator, &Agent, &AgentEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation referenced a handle that is not (or no longer) registered.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// A locally-validated argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The peer answered a typed query with a shape we cannot decode.
    #[error("unexpected reply shape from {command}: {source}")]
    UnexpectedReply {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A stepping reply carried an event we could not decode.
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("session state poisoned")]
    LockPoisoned,
}

type CallbackMap = HashMap<AgentId, HashMap<EventKind, Vec<EventHandler>>>;

/// Live control session with a running simulator instance.
///
/// Owns the transport, the registry of live agent handles, and the
/// per-agent, per-kind callback sets. Registries are mutex-guarded so the
/// controller can be shared across threads; the wire itself still admits
/// only one command at a time.
pub struct Simulator {
    remote: Transport,
    agents: Mutex<HashMap<AgentId, Agent>>,
    callbacks: Mutex<CallbackMap>,
    stopped: AtomicBool,
}

impl Simulator {
    /// Connect using [`ClientConfig::default`] (`localhost:8181`).
    pub fn connect_default() -> Result<Self> {
        Self::connect(&ClientConfig::default())
    }

    /// Connect to the simulator's command socket.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let remote = Transport::connect(&config.address, config.port)?;
        Ok(Self {
            remote,
            agents: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Shut the connection down. Pending and future commands fail.
    pub fn close(mut self) -> Result<()> {
        self.remote.close()?;
        Ok(())
    }

    /// Raw command passthrough for surfaces this crate does not wrap.
    pub fn command(&self, name: &str, arguments: Value) -> Result<Value> {
        Ok(self.remote.command(name, arguments)?)
    }

    // ===== agent lifecycle =====

    /// Spawn a new agent and register its handle.
    pub fn add_agent(&self, name: &str, kind: AgentKind, state: Option<AgentState>) -> Result<Agent> {
        let state = state.unwrap_or_default();
        let reply = self.command(
            "simulator/add_agent",
            json!({"name": name, "type": kind.wire_value(), "state": state}),
        )?;
        let uid: String = serde_json::from_value(reply).map_err(|source| {
            Error::from(SessionError::UnexpectedReply {
                command: "simulator/add_agent",
                source,
            })
        })?;
        let agent = Agent::new(AgentId::from(uid), kind, name);
        self.lock_agents()?.insert(agent.id().clone(), agent.clone());
        debug!(agent = %agent.id(), name, "agent added");
        Ok(agent)
    }

    /// Remove an agent from the simulation.
    ///
    /// Local bookkeeping is best-effort: the handle and its callbacks are
    /// forgotten even when the peer rejects the removal, and the peer error
    /// is still returned.
    pub fn remove_agent(&self, agent: &Agent) -> Result<()> {
        self.ensure_registered(agent.id())?;
        let outcome = self.command("simulator/agent/remove", json!({"uid": agent.id()}));
        self.lock_agents()?.remove(agent.id());
        self.lock_callbacks()?.remove(agent.id());
        debug!(agent = %agent.id(), "agent removed");
        outcome.map(|_| ())
    }

    /// Handles of every live agent, in no particular order.
    pub fn agents(&self) -> Result<Vec<Agent>> {
        Ok(self.lock_agents()?.values().cloned().collect())
    }

    /// Look a handle up by identifier.
    pub fn agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.lock_agents()?.get(id).cloned())
    }

    // ===== callbacks and the run loop =====

    /// Register `handler` for `kind` events on `agent`.
    ///
    /// The first registration for an `(agent, kind)` pair tells the peer to
    /// start reporting that kind at all. Registering the same handler (the
    /// same `Arc`) again is a no-op.
    pub fn register_callback(
        &self,
        agent: &Agent,
        kind: EventKind,
        handler: EventHandler,
    ) -> Result<()> {
        self.ensure_registered(agent.id())?;
        let first = {
            let callbacks = self.lock_callbacks()?;
            callbacks
                .get(agent.id())
                .and_then(|kinds| kinds.get(&kind))
                .is_none_or(Vec::is_empty)
        };
        if first {
            self.command(kind.enable_command(), json!({"uid": agent.id()}))?;
        }

        let mut callbacks = self.lock_callbacks()?;
        let set = callbacks
            .entry(agent.id().clone())
            .or_default()
            .entry(kind)
            .or_default();
        if set.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            return Ok(());
        }
        set.push(handler);
        Ok(())
    }

    /// Advance simulation time, dispatching subscribed events as they occur.
    ///
    /// `time_limit` is in simulated seconds; `0.0` runs until stopped. The
    /// peer pauses after each internal tick to report a batch of events;
    /// every batch is drained in peer order before one `simulator/continue`
    /// is issued. [`Simulator::stop`] ends the run at the next checkpoint:
    /// immediately after the current handler, or after the current batch.
    pub fn run(&self, time_limit: f64) -> Result<()> {
        self.stopped.store(false, Ordering::SeqCst);
        let mut reply = self.command("simulator/run", json!({"time_limit": time_limit}))?;
        loop {
            let Some(events) = reply.get("events") else {
                return Ok(());
            };
            let events = events
                .as_array()
                .ok_or_else(|| Error::from(SessionError::Event(EventError::InvalidField("events"))))?;
            self.dispatch_batch(events)?;
            if self.stopped() {
                return Ok(());
            }
            reply = self.command("simulator/continue", json!({}))?;
        }
    }

    /// Request cooperative termination of the current [`Simulator::run`].
    ///
    /// Never interrupts a command already in flight; the run ends at the
    /// next checkpoint.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn dispatch_batch(&self, events: &[Value]) -> Result<()> {
        for raw in events {
            let Some(wire) = WireEvent::parse(raw)? else {
                debug!("skipping event of unknown kind");
                continue;
            };
            let Some(agent) = self.agent(&wire.agent)? else {
                trace!(agent = %wire.agent, "event for unregistered agent skipped");
                continue;
            };
            let handlers: Vec<EventHandler> = {
                let callbacks = self.lock_callbacks()?;
                callbacks
                    .get(&wire.agent)
                    .and_then(|kinds| kinds.get(&wire.event.kind()))
                    .cloned()
                    .unwrap_or_default()
            };
            for handler in handlers {
                handler(self, &agent, &wire.event);
                if self.stopped() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    // ===== scene and environment =====

    /// Simulator build version string.
    pub fn version(&self) -> Result<String> {
        self.query("simulator/version", json!({}))
    }

    /// Name of the loaded scene, if any.
    pub fn current_scene(&self) -> Result<Option<String>> {
        self.query("simulator/current_scene", json!({}))
    }

    /// Frames simulated since the scene was loaded.
    pub fn current_frame(&self) -> Result<u64> {
        self.query("simulator/current_frame", json!({}))
    }

    /// Simulated seconds since the scene was loaded.
    pub fn current_time(&self) -> Result<f64> {
        self.query("simulator/current_time", json!({}))
    }

    /// Load a scene, invalidating every live handle.
    pub fn load_scene(&self, scene: &str) -> Result<()> {
        self.command("simulator/load_scene", json!({"scene": scene}))?;
        self.clear_registries()
    }

    /// Reset the current scene, invalidating every live handle.
    pub fn reset(&self) -> Result<()> {
        self.command("simulator/reset", json!({}))?;
        self.clear_registries()
    }

    pub fn weather(&self) -> Result<WeatherState> {
        self.query("environment/weather/get", json!({}))
    }

    pub fn set_weather(&self, weather: WeatherState) -> Result<()> {
        self.command("environment/weather/set", json!(weather))?;
        Ok(())
    }

    /// Time of day in hours, `[0, 24)`.
    pub fn time_of_day(&self) -> Result<f64> {
        self.query("environment/time/get", json!({}))
    }

    /// Set the time of day; `fixed` freezes the day/night cycle.
    pub fn set_time_of_day(&self, hours: f64, fixed: bool) -> Result<()> {
        self.command("environment/time/set", json!({"time": hours, "fixed": fixed}))?;
        Ok(())
    }

    /// Poses where agents may be spawned on the current map.
    pub fn spawn_points(&self) -> Result<Vec<Transform>> {
        self.query("map/spawn/get", json!({}))
    }

    /// Snap a point to the closest lane on the current map.
    pub fn map_point_on_lane(&self, point: Vector) -> Result<Transform> {
        self.query("map/point_on_lane", json!({"point": point}))
    }

    /// Cast a ray into the scene. `None` when nothing was hit within
    /// `max_distance`.
    pub fn raycast(
        &self,
        origin: Vector,
        direction: Vector,
        layer_mask: i64,
        max_distance: f64,
    ) -> Result<Option<RaycastHit>> {
        let reply = self.command(
            "simulator/raycast",
            json!({
                "origin": origin,
                "direction": direction,
                "layer_mask": layer_mask,
                "max_distance": max_distance,
            }),
        )?;
        if reply.is_null() {
            return Ok(None);
        }
        serde_json::from_value(reply)
            .map(Some)
            .map_err(|source| {
                Error::from(SessionError::UnexpectedReply {
                    command: "simulator/raycast",
                    source,
                })
            })
    }

    // ===== internals =====

    /// Registry-checked command on behalf of an agent handle.
    pub(crate) fn agent_command(&self, agent: &AgentId, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_registered(agent)?;
        self.command(name, arguments)
    }

    fn query<T: DeserializeOwned>(&self, command: &'static str, arguments: Value) -> Result<T> {
        let reply = self.command(command, arguments)?;
        serde_json::from_value(reply)
            .map_err(|source| Error::from(SessionError::UnexpectedReply { command, source }))
    }

    fn ensure_registered(&self, agent: &AgentId) -> Result<()> {
        if self.lock_agents()?.contains_key(agent) {
            Ok(())
        } else {
            Err(SessionError::UnknownAgent(agent.clone()).into())
        }
    }

    fn clear_registries(&self) -> Result<()> {
        self.lock_agents()?.clear();
        self.lock_callbacks()?.clear();
        Ok(())
    }

    fn lock_agents(&self) -> Result<MutexGuard<'_, HashMap<AgentId, Agent>>> {
        self.agents
            .lock()
            .map_err(|_| Error::from(SessionError::LockPoisoned))
    }

    fn lock_callbacks(&self) -> Result<MutexGuard<'_, CallbackMap>> {
        self.callbacks
            .lock()
            .map_err(|_| Error::from(SessionError::LockPoisoned))
    }
}
