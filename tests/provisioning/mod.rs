//! Provisioning scenarios backed by scripted control-plane and channel fakes.

mod bdd_steps;
mod scenarios;
mod test_helpers;
