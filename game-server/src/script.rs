//! The embedded script-host contract.
//!
//! The simulation does not depend on a particular scripting language. Any
//! host that can satisfy this call/return contract can drive NPCs, item
//! effects and map logic. Script calls are synchronous with respect to the
//! tick; structural world changes go through the deferred-event queue on
//! the context, never through iterator-invalidating primitives.

use crate::entity::{EntityId, World};
use crate::state::EventQueue;

/// What a running script may touch.
pub struct ScriptContext<'a> {
    pub world: &'a mut World,
    pub queue: &'a mut EventQueue,
    pub map_id: u16,
    pub tick: u64,
}

pub trait ScriptHost: Send {
    /// Selects the function the next `execute` will run.
    fn prepare(&mut self, function: &str);
    fn push_int(&mut self, value: i32);
    fn push_string(&mut self, value: &str);
    fn push_entity(&mut self, id: EntityId);
    /// Runs the prepared call; the return value is the script's int result.
    fn execute(&mut self, ctx: &mut ScriptContext) -> i32;
    /// Per-tick hook for the map the host is attached to.
    fn update(&mut self, ctx: &mut ScriptContext);
    /// Death and removal notifications for entities scripts may track.
    fn entity_died(&mut self, _ctx: &mut ScriptContext, _id: EntityId) {}
    fn entity_removed(&mut self, _ctx: &mut ScriptContext, _id: EntityId) {}
}

/// The no-op host used when a map carries no script.
#[derive(Default)]
pub struct NullScript;

impl ScriptHost for NullScript {
    fn prepare(&mut self, _function: &str) {}
    fn push_int(&mut self, _value: i32) {}
    fn push_string(&mut self, _value: &str) {}
    fn push_entity(&mut self, _id: EntityId) {}
    fn execute(&mut self, _ctx: &mut ScriptContext) -> i32 {
        0
    }
    fn update(&mut self, _ctx: &mut ScriptContext) {}
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Records calls through shared counters for assertions.
    #[derive(Default)]
    pub struct RecordingScript {
        pub calls: Vec<String>,
        pub args: Vec<i32>,
        pub updates: Arc<AtomicU64>,
    }

    impl ScriptHost for RecordingScript {
        fn prepare(&mut self, function: &str) {
            self.calls.push(function.to_string());
            self.args.clear();
        }
        fn push_int(&mut self, value: i32) {
            self.args.push(value);
        }
        fn push_string(&mut self, _value: &str) {}
        fn push_entity(&mut self, id: EntityId) {
            self.args.push(id.0 as i32);
        }
        fn execute(&mut self, _ctx: &mut ScriptContext) -> i32 {
            self.args.iter().sum()
        }
        fn update(&mut self, _ctx: &mut ScriptContext) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
    }
}
