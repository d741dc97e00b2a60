//! Closed status model derived from raw control-plane strings.

use std::fmt;

use super::types::InstanceResource;

/// Lifecycle state of a compute resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResourceStatus {
    /// Being created, scheduled, or repaired.
    Provisioning,
    /// Booted and schedulable.
    Running,
    /// Shutting down or suspending.
    Stopping,
    /// Stopped, terminated, or suspended.
    Stopped,
    /// The control plane does not know the resource.
    NotFound,
    /// A status string this crate does not recognise.
    Unknown(String),
}

impl ResourceStatus {
    /// Maps a raw status string. Matching ignores case and surrounding
    /// whitespace; anything unrecognised becomes [`ResourceStatus::Unknown`].
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PROVISIONING" | "STAGING" | "REPAIRING" => Self::Provisioning,
            "RUNNING" => Self::Running,
            "STOPPING" | "SUSPENDING" => Self::Stopping,
            "TERMINATED" | "STOPPED" | "SUSPENDED" => Self::Stopped,
            _ => Self::Unknown(raw.trim().to_owned()),
        }
    }

    /// Derives the status of an optional lookup result.
    #[must_use]
    pub fn of(instance: Option<&InstanceResource>) -> Self {
        match instance {
            None => Self::NotFound,
            Some(found) => found
                .status
                .as_deref()
                .map_or_else(|| Self::Unknown(String::new()), Self::from_raw),
        }
    }

    /// Returns whether the resource is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns whether the resource is stopping or stopped.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => f.write_str("Provisioning"),
            Self::Running => f.write_str("Running"),
            Self::Stopping => f.write_str("Stopping"),
            Self::Stopped => f.write_str("Stopped"),
            Self::NotFound => f.write_str("NotFound"),
            Self::Unknown(raw) => write!(f, "Unknown({raw})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("PROVISIONING", ResourceStatus::Provisioning)]
    #[case("STAGING", ResourceStatus::Provisioning)]
    #[case("REPAIRING", ResourceStatus::Provisioning)]
    #[case("RUNNING", ResourceStatus::Running)]
    #[case(" running ", ResourceStatus::Running)]
    #[case("STOPPING", ResourceStatus::Stopping)]
    #[case("SUSPENDING", ResourceStatus::Stopping)]
    #[case("TERMINATED", ResourceStatus::Stopped)]
    #[case("SUSPENDED", ResourceStatus::Stopped)]
    fn maps_known_statuses(#[case] raw: &str, #[case] expected: ResourceStatus) {
        assert_eq!(ResourceStatus::from_raw(raw), expected);
    }

    #[test]
    fn unrecognised_status_fails_closed() {
        let status = ResourceStatus::from_raw("HIBERNATING");
        assert_eq!(status, ResourceStatus::Unknown(String::from("HIBERNATING")));
        assert!(!status.is_running());
    }

    #[test]
    fn missing_instance_is_not_found() {
        assert_eq!(ResourceStatus::of(None), ResourceStatus::NotFound);
    }

    #[test]
    fn instance_without_status_is_unknown() {
        let instance = InstanceResource::default();
        assert_eq!(
            ResourceStatus::of(Some(&instance)),
            ResourceStatus::Unknown(String::new())
        );
    }
}
