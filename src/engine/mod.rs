//! Orchestration layer: transactional cascades that span the `commands`
//! and `update_state`/`update_events` tables. The model modules
//! (`crate::models::command`, `crate::models::update`) only ever touch
//! one table at a time; every rule in spec §4.4/§4.5 that says "atomic
//! with" lives here instead.

pub mod commands;
pub mod updates;
