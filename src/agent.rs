//! Agent handles, kinematic state, and motion command wrappers.
//!
//! Handles are arena-style: [`AgentId`] and [`Agent`] are cheap to clone and
//! own no controller state, so every operation goes through a
//! [`Simulator`] method that checks the registry first. Operations on a
//! handle that was removed (or invalidated by a scene change) fail locally
//! before touching the wire.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::geometry::{BoundingBox, Transform, Vector};
use crate::session::{SessionError, Simulator};
use crate::Result;

/// Opaque identifier the simulator assigns to a spawned agent.
///
/// Identity is the identifier value alone. Identifiers are meaningless
/// across scene loads and resets.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(uid: &str) -> Self {
        Self(uid.to_string())
    }
}

impl From<String> for AgentId {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({:?})", self.0)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of actor to spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Ego,
    Npc,
    Pedestrian,
}

impl AgentKind {
    /// Numeric value the wire protocol uses for this kind.
    pub(crate) fn wire_value(self) -> u8 {
        match self {
            AgentKind::Ego => 1,
            AgentKind::Npc => 2,
            AgentKind::Pedestrian => 3,
        }
    }
}

/// Registry record for a live agent.
///
/// Equality and hashing follow the identifier alone.
#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,
    kind: AgentKind,
    name: String,
}

impl Agent {
    pub(crate) fn new(id: AgentId, kind: AgentKind, name: &str) -> Self {
        Self {
            id,
            kind,
            name: name.to_string(),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Full kinematic state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub transform: Transform,
    pub velocity: Vector,
    pub angular_velocity: Vector,
}

impl AgentState {
    /// Scalar speed in m/s.
    pub fn speed(&self) -> f64 {
        self.velocity.magnitude()
    }
}

/// Low-level vehicle control inputs.
///
/// Optional channels are omitted from the wire when `None`, leaving the
/// simulator-side value untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VehicleControl {
    /// Steering in `[-1, +1]`.
    pub steering: f64,
    /// Throttle in `[0, 1]`.
    pub throttle: f64,
    /// Braking in `[0, 1]`.
    pub braking: f64,
    pub reverse: bool,
    pub handbrake: bool,
    /// 0 = off, 1 = low beams, 2 = high beams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headlights: Option<u8>,
    /// 0 = off, 1-3 = increasing speed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windshield_wipers: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_signal_left: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_signal_right: Option<bool>,
}

/// One waypoint of a driven route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriveWaypoint {
    pub position: Vector,
    /// Target speed while approaching this waypoint, in m/s.
    pub speed: f64,
}

/// One waypoint of a walked route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WalkWaypoint {
    pub position: Vector,
    /// Seconds to idle after arriving.
    pub idle: f64,
}

impl Simulator {
    /// Current kinematic state of an agent.
    pub fn agent_state(&self, agent: &Agent) -> Result<AgentState> {
        let reply = self.agent_command(agent.id(), "agent/state/get", json!({"uid": agent.id()}))?;
        serde_json::from_value(reply).map_err(|source| {
            SessionError::UnexpectedReply {
                command: "agent/state/get",
                source,
            }
            .into()
        })
    }

    /// Teleport an agent to a new kinematic state.
    pub fn set_agent_state(&self, agent: &Agent, state: &AgentState) -> Result<()> {
        self.agent_command(
            agent.id(),
            "agent/state/set",
            json!({"uid": agent.id(), "state": state}),
        )?;
        Ok(())
    }

    /// Bounds of an agent in its local frame.
    pub fn bounding_box(&self, agent: &Agent) -> Result<BoundingBox> {
        let reply = self.agent_command(
            agent.id(),
            "agent/bounding_box/get",
            json!({"uid": agent.id()}),
        )?;
        serde_json::from_value(reply).map_err(|source| {
            SessionError::UnexpectedReply {
                command: "agent/bounding_box/get",
                source,
            }
            .into()
        })
    }

    /// Apply control inputs to a vehicle for the next tick, or until
    /// replaced when `sticky` is set.
    pub fn apply_vehicle_control(
        &self,
        agent: &Agent,
        control: &VehicleControl,
        sticky: bool,
    ) -> Result<()> {
        if let Some(intensity) = control.headlights {
            if intensity > 2 {
                return Err(SessionError::InvalidArgument(
                    "headlights intensity must be 0-2",
                )
                .into());
            }
        }
        self.agent_command(
            agent.id(),
            "vehicle/apply_control",
            json!({"uid": agent.id(), "sticky": sticky, "control": control}),
        )?;
        Ok(())
    }

    /// Drive a vehicle along `waypoints`, optionally looping forever.
    pub fn follow_waypoints(
        &self,
        agent: &Agent,
        waypoints: &[DriveWaypoint],
        loop_route: bool,
    ) -> Result<()> {
        self.agent_command(
            agent.id(),
            "vehicle/follow_waypoints",
            json!({"uid": agent.id(), "waypoints": waypoints, "loop": loop_route}),
        )?;
        Ok(())
    }

    /// Hand a vehicle to the lane-following planner.
    pub fn follow_closest_lane(
        &self,
        agent: &Agent,
        follow: bool,
        max_speed: f64,
        lane_changes: bool,
    ) -> Result<()> {
        self.agent_command(
            agent.id(),
            "vehicle/follow_closest_lane",
            json!({
                "uid": agent.id(),
                "follow": follow,
                "max_speed": max_speed,
                "isLaneChange": lane_changes,
            }),
        )?;
        Ok(())
    }

    /// Request a lane change at the next opportunity.
    pub fn change_lane(&self, agent: &Agent, left: bool) -> Result<()> {
        self.agent_command(
            agent.id(),
            "vehicle/change_lane",
            json!({"uid": agent.id(), "isLeftChange": left}),
        )?;
        Ok(())
    }

    /// Toggle random wandering for a pedestrian.
    pub fn walk_randomly(&self, agent: &Agent, enable: bool) -> Result<()> {
        self.agent_command(
            agent.id(),
            "pedestrian/walk_randomly",
            json!({"uid": agent.id(), "enable": enable}),
        )?;
        Ok(())
    }

    /// Walk a pedestrian along `waypoints`, optionally looping forever.
    pub fn follow_walk_waypoints(
        &self,
        agent: &Agent,
        waypoints: &[WalkWaypoint],
        loop_route: bool,
    ) -> Result<()> {
        self.agent_command(
            agent.id(),
            "pedestrian/follow_waypoints",
            json!({"uid": agent.id(), "waypoints": waypoints, "loop": loop_route}),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_control_channels_stay_off_the_wire() {
        let control = VehicleControl {
            throttle: 0.4,
            ..VehicleControl::default()
        };
        assert_eq!(
            serde_json::to_value(control).expect("serialize"),
            json!({
                "steering": 0.0,
                "throttle": 0.4,
                "braking": 0.0,
                "reverse": false,
                "handbrake": false,
            })
        );
    }

    #[test]
    fn set_control_channels_are_serialized() {
        let control = VehicleControl {
            headlights: Some(2),
            turn_signal_left: Some(true),
            ..VehicleControl::default()
        };
        let value = serde_json::to_value(control).expect("serialize");
        assert_eq!(value["headlights"], json!(2));
        assert_eq!(value["turn_signal_left"], json!(true));
        assert!(value.get("windshield_wipers").is_none());
    }

    #[test]
    fn agent_identity_follows_the_identifier() {
        let a = Agent::new(AgentId::from("uid-1"), AgentKind::Npc, "first");
        let b = Agent::new(AgentId::from("uid-1"), AgentKind::Ego, "second");
        let c = Agent::new(AgentId::from("uid-2"), AgentKind::Npc, "first");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
