//! Behavioural scenarios for provisioning an instance end to end.

mod provisioning;
