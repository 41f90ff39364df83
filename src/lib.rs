pub mod amqp;
pub mod config;
pub mod entity;
pub mod error;
pub mod management;
pub mod permissions;
pub mod provisioner;
pub mod servicebus;

pub use error::ProvisionError;
pub use provisioner::{EntityProvisioner, ProvisioningReport, ProvisioningRequest};
