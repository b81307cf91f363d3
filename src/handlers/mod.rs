//! HTTP handlers

pub mod agent;
pub mod health;
pub mod operator_agents;
pub mod operator_commands;
pub mod operator_tokens;
pub mod operator_updates;
pub mod poll;
