// devices/state.rs
use crate::{
    commands::Command,
    models::{Bulb, BulbId, BulbState, BulbView},
};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("No state tracked for bulb {0}")]
pub struct StateNotFound(pub BulbId);

/// In-memory state of every configured bulb. Each operation locks a single shard.
#[derive(Debug)]
pub struct BulbStateStore {
    states: DashMap<BulbId, BulbState>,
}

impl BulbStateStore {
    pub fn new(ids: impl IntoIterator<Item = BulbId>, initial: &BulbState) -> Self {
        let states = ids.into_iter().map(|id| (id, initial.clone())).collect();
        Self { states }
    }

    pub fn get(&self, id: BulbId) -> Option<BulbState> {
        self.states.get(&id).map(|entry| entry.value().clone())
    }

    /// Overwrites the three attributes. Returns false if the bulb is not tracked.
    pub fn update(&self, id: BulbId, command: &Command) -> bool {
        match self.states.get_mut(&id) {
            Some(mut entry) => {
                let state = entry.value_mut();
                state.state = command.state;
                state.brightness = command.brightness;
                state.color.clone_from(&command.color);
                true
            }
            None => false,
        }
    }

    /// Static bulb config with the runtime state laid over it.
    pub fn view(&self, bulb: &Bulb) -> Result<BulbView, StateNotFound> {
        let state = self.get(bulb.id).ok_or(StateNotFound(bulb.id))?;

        let mut view = bulb.attributes.clone();
        view.insert("id".into(), Value::from(bulb.id));
        view.insert("state".into(), Value::from(state.state.as_str()));
        view.insert("brightness".into(), Value::from(state.brightness));
        view.insert("color".into(), Value::from(state.color));
        Ok(view)
    }
}
