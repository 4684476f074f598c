//! Simulation event kinds and payloads.
//!
//! The peer reports events inside stepping replies as an `events` array;
//! each element carries an `agent` identifier, a `type` string, and
//! kind-specific fields.

use serde_json::Value;
use thiserror::Error;

use crate::agent::AgentId;
use crate::geometry::Vector;

/// Discrete event kinds a simulation step can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Collision,
    WaypointReached,
    StopLine,
    LaneChange,
}

impl EventKind {
    /// Wire name of the kind, as the peer reports it.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Collision => "collision",
            EventKind::WaypointReached => "waypoint_reached",
            EventKind::StopLine => "stop_line",
            EventKind::LaneChange => "lane_change",
        }
    }

    /// Command that tells the peer to start emitting this kind for an agent.
    pub(crate) fn enable_command(self) -> &'static str {
        match self {
            EventKind::Collision => "agent/on_collision",
            EventKind::WaypointReached => "agent/on_waypoint_reached",
            EventKind::StopLine => "agent/on_stop_line",
            EventKind::LaneChange => "agent/on_lane_change",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "collision" => Some(EventKind::Collision),
            "waypoint_reached" => Some(EventKind::WaypointReached),
            "stop_line" => Some(EventKind::StopLine),
            "lane_change" => Some(EventKind::LaneChange),
            _ => None,
        }
    }
}

/// Payload delivered to callbacks, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Contact with another agent (or scenery, in which case `other` is
    /// absent) at `contact`.
    Collision {
        other: Option<AgentId>,
        contact: Vector,
    },
    /// The agent passed waypoint `index` of its current route.
    WaypointReached { index: u64 },
    /// The agent reached a stop line.
    StopLine,
    /// The agent finished a lane change.
    LaneChange,
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::Collision { .. } => EventKind::Collision,
            AgentEvent::WaypointReached { .. } => EventKind::WaypointReached,
            AgentEvent::StopLine => EventKind::StopLine,
            AgentEvent::LaneChange => EventKind::LaneChange,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("event field `{0}` has an unexpected shape")]
    InvalidField(&'static str),
}

/// One event as it appears in a stepping reply.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub agent: AgentId,
    pub event: AgentEvent,
}

impl WireEvent {
    /// Parse one element of an `events` array.
    ///
    /// Unknown `type` strings decode to `None` so newer peers stay usable;
    /// known kinds with missing or malformed fields are errors.
    pub fn parse(value: &Value) -> Result<Option<Self>, EventError> {
        let agent = match value.get("agent") {
            Some(Value::String(uid)) => AgentId::from(uid.as_str()),
            Some(_) => return Err(EventError::InvalidField("agent")),
            None => return Err(EventError::MissingField("agent")),
        };
        let kind = match value.get("type") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(EventError::InvalidField("type")),
            None => return Err(EventError::MissingField("type")),
        };
        let Some(kind) = EventKind::from_wire(kind) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::Collision => {
                let other = match value.get("other") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(uid)) => Some(AgentId::from(uid.as_str())),
                    Some(_) => return Err(EventError::InvalidField("other")),
                };
                let contact = value
                    .get("contact")
                    .ok_or(EventError::MissingField("contact"))?;
                let contact: Vector = serde_json::from_value(contact.clone())
                    .map_err(|_| EventError::InvalidField("contact"))?;
                AgentEvent::Collision { other, contact }
            }
            EventKind::WaypointReached => {
                let index = value
                    .get("index")
                    .ok_or(EventError::MissingField("index"))?
                    .as_u64()
                    .ok_or(EventError::InvalidField("index"))?;
                AgentEvent::WaypointReached { index }
            }
            EventKind::StopLine => AgentEvent::StopLine,
            EventKind::LaneChange => AgentEvent::LaneChange,
        };

        Ok(Some(WireEvent { agent, event }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_collision_with_other_agent() {
        let wire = WireEvent::parse(&json!({
            "agent": "ego-1",
            "type": "collision",
            "other": "npc-7",
            "contact": {"x": 1.0, "y": 0.0, "z": -2.5},
        }))
        .expect("parse")
        .expect("known kind");

        assert_eq!(wire.agent, AgentId::from("ego-1"));
        assert_eq!(
            wire.event,
            AgentEvent::Collision {
                other: Some(AgentId::from("npc-7")),
                contact: Vector::new(1.0, 0.0, -2.5),
            }
        );
    }

    #[test]
    fn parses_collision_with_scenery() {
        let wire = WireEvent::parse(&json!({
            "agent": "ego-1",
            "type": "collision",
            "other": null,
            "contact": {"x": 0.0, "y": 0.0, "z": 0.0},
        }))
        .expect("parse")
        .expect("known kind");

        assert!(matches!(wire.event, AgentEvent::Collision { other: None, .. }));
    }

    #[test]
    fn parses_waypoint_reached() {
        let wire = WireEvent::parse(&json!({
            "agent": "npc-3",
            "type": "waypoint_reached",
            "index": 4,
        }))
        .expect("parse")
        .expect("known kind");

        assert_eq!(wire.event, AgentEvent::WaypointReached { index: 4 });
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let parsed = WireEvent::parse(&json!({
            "agent": "npc-3",
            "type": "teleported",
        }))
        .expect("parse");
        assert!(parsed.is_none());
    }

    #[test]
    fn known_kind_with_missing_field_is_an_error() {
        let err = WireEvent::parse(&json!({
            "agent": "npc-3",
            "type": "waypoint_reached",
        }))
        .expect_err("missing index");
        assert!(matches!(err, EventError::MissingField("index")));
    }

    #[test]
    fn missing_agent_is_an_error() {
        let err = WireEvent::parse(&json!({"type": "stop_line"})).expect_err("missing agent");
        assert!(matches!(err, EventError::MissingField("agent")));
    }
}
