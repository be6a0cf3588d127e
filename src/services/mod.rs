//! Core services: backend clients, the provisioning saga and its helpers.

pub mod bucket_provisioner;
pub mod compensation;
pub mod compute;
pub mod config_merger;
pub mod orchestrator;
pub mod org_gatekeeper;
pub mod proxy;
pub mod secrets;
pub mod storage;

#[cfg(test)]
pub mod testing;
