//! Category policy: which service calls replay a recorded snapshot.

use serde_json::Value;

use crate::entity::{EntityDomain, EntityId};
use crate::error::DispatchError;
use crate::state::StateSnapshot;

use super::ServiceCall;

const STATE_ON: &str = "on";
const STATE_OFF: &str = "off";
const STATE_OPEN: &str = "open";
const STATE_CLOSED: &str = "closed";

/// Plans the service calls that replay a snapshot.
pub trait ActionPlanner: Send + Sync {
    /// Calls to issue, in order. An empty plan means nothing to do.
    ///
    /// # Errors
    /// `DispatchError::UnsupportedState` when the state cannot be replayed.
    fn plan(&self, entity: &EntityId, target: &StateSnapshot) -> Result<Vec<ServiceCall>, DispatchError>;
}

/// Default policy.
///
/// - Light: `light.turn_on|turn_off`, copying `brightness` and `rgb_color`.
/// - Cover: `closed` closes; `open` sets the recorded position, or simply
///   opens when none was recorded. A recorded tilt on a settled cover adds a
///   `set_cover_tilt_position` call after the primary one, which is then
///   made blocking. Covers caught mid-travel (`opening`, `closing`) are left
///   alone.
/// - Anything else: `homeassistant.turn_<state>` with the recorded state
///   passed through; the executor decides whether such a service exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPlanner;

impl ActionPlanner for DefaultPlanner {
    fn plan(&self, entity: &EntityId, target: &StateSnapshot) -> Result<Vec<ServiceCall>, DispatchError> {
        match entity.category() {
            EntityDomain::Light => plan_light(entity, target),
            EntityDomain::Cover => Ok(plan_cover(entity, target)),
            EntityDomain::Group | EntityDomain::Other => plan_power(entity, target),
        }
    }
}

fn unsupported(entity: &EntityId, target: &StateSnapshot) -> DispatchError {
    DispatchError::UnsupportedState {
        entity: entity.clone(),
        state: target.state.clone(),
    }
}

/// Lights only know `turn_on` and `turn_off`.
fn light_service(entity: &EntityId, target: &StateSnapshot) -> Result<&'static str, DispatchError> {
    match target.state.as_str() {
        STATE_ON => Ok("turn_on"),
        STATE_OFF => Ok("turn_off"),
        _ => Err(unsupported(entity, target)),
    }
}

fn plan_light(entity: &EntityId, target: &StateSnapshot) -> Result<Vec<ServiceCall>, DispatchError> {
    let mut call = ServiceCall::new("light", light_service(entity, target)?, entity.clone());
    if let Some(brightness) = target.brightness() {
        call = call.with_data("brightness", brightness.clone());
    }
    if let Some(color) = target.rgb_color() {
        call = call.with_data("rgb_color", color.clone());
    }
    Ok(vec![call])
}

fn plan_cover(entity: &EntityId, target: &StateSnapshot) -> Vec<ServiceCall> {
    let settled = target.is(STATE_OPEN) || target.is(STATE_CLOSED);
    let tilt = target.current_tilt_position().filter(|_| settled);

    let mut calls = Vec::with_capacity(2);
    if target.is(STATE_CLOSED) {
        calls.push(ServiceCall::new("cover", "close_cover", entity.clone()));
    } else if target.is(STATE_OPEN) {
        let call = match target.current_position() {
            Some(position) => {
                ServiceCall::new("cover", "set_cover_position", entity.clone()).with_data("position", position.clone())
            }
            None => ServiceCall::new("cover", "open_cover", entity.clone()),
        };
        calls.push(call);
    }

    if let Some(tilt) = tilt {
        // The tilt only sticks once the primary movement has finished.
        if let Some(primary) = calls.last_mut() {
            primary.blocking = true;
        }
        calls.push(
            ServiceCall::new("cover", "set_cover_tilt_position", entity.clone())
                .with_data("tilt_position", Value::clone(tilt)),
        );
    }
    calls
}

fn plan_power(entity: &EntityId, target: &StateSnapshot) -> Result<Vec<ServiceCall>, DispatchError> {
    if target.state.is_empty() {
        return Err(unsupported(entity, target));
    }
    Ok(vec![ServiceCall::new(
        "homeassistant",
        format!("turn_{}", target.state),
        entity.clone(),
    )])
}
