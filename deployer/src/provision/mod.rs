//! Infrastructure provisioning through Terraform

pub mod terraform;
