//! Read-only network validation run before any instance is created.
//!
//! Instances without an external address need two things from their network:
//! outbound NAT for the subnet (fatal when absent) and an ingress rule
//! admitting the proxy broker's source range on the SSH port (advisory).

pub mod remediation;

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compute::{ComputeApi, ComputeError, Firewall, Router, resource_path};
use crate::request::{ConnectivityMode, ProvisionRequest};

pub use remediation::{
    FIREWALL_RULE_NAME, FirewallRemediation, IAP_SOURCE_RANGE, NAT_CONFIG_NAME, NAT_ROUTER_NAME,
    NatRemediation, SSH_PORT,
};

const ALL_SUBNETWORKS: &str = "ALL_SUBNETWORKS_ALL_IP_RANGES";
const LIST_OF_SUBNETWORKS: &str = "LIST_OF_SUBNETWORKS";
const IAP_RULE_MARKER: &str = "allow-iap";
const DEFAULT_NETWORK: &str = "default";

/// Which network property a finding describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreflightCheck {
    /// Outbound NAT for the subnet.
    Nat,
    /// Ingress rule for the proxy broker.
    Firewall,
}

/// Outcome of a single check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FindingStatus {
    /// An existing resource satisfies the check.
    Satisfied {
        /// Name of the router/NAT pair or firewall rule that matched.
        matched: String,
    },
    /// Nothing satisfies the check.
    Missing,
}

/// Corrective commands attached to a finding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Remediation {
    /// Create a router and NAT configuration.
    Nat(NatRemediation),
    /// Create an ingress firewall rule.
    Firewall(FirewallRemediation),
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nat(nat) => nat.fmt(f),
            Self::Firewall(rule) => rule.fmt(f),
        }
    }
}

/// Result of one network validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreflightFinding {
    /// The property checked.
    pub check: PreflightCheck,
    /// Whether it holds.
    pub status: FindingStatus,
    /// Commands that would make it hold.
    pub remediation: Remediation,
}

impl PreflightFinding {
    /// Returns whether the check passed.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self.status, FindingStatus::Satisfied { .. })
    }
}

impl fmt::Display for PreflightFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            FindingStatus::Satisfied { matched } => {
                let label = match self.check {
                    PreflightCheck::Nat => "NAT",
                    PreflightCheck::Firewall => "firewall rule",
                };
                write!(f, "{label} satisfied by {matched}")
            }
            FindingStatus::Missing => self.remediation.fmt(f),
        }
    }
}

/// Findings gathered by [`NetworkPreflight::run`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PreflightReport {
    /// NAT finding; absent when the checks were skipped.
    pub nat: Option<PreflightFinding>,
    /// Firewall finding; absent when skipped or when rules could not be
    /// listed.
    pub firewall: Option<PreflightFinding>,
}

/// Errors that abort provisioning before creation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PreflightError {
    /// Raised when proxied mode is selected without a subnetwork.
    #[error("a subnetwork must be set when the instance has no public address (GANTRY_SUBNETWORK)")]
    MissingSubnetwork,
    /// Raised when the subnetwork reference cannot be reduced to a name.
    #[error(
        "subnetwork '{0}' must be <name>, <region>/<name>, <project>/<region>/<name>, or projects/<project>/regions/<region>/subnetworks/<name>"
    )]
    InvalidSubnetReference(String),
    /// Raised when no NAT covers the subnet.
    #[error("{0}")]
    NatMissing(Box<PreflightFinding>),
    /// Raised when routers cannot be listed.
    #[error("failed to check Cloud NAT configuration: {0}")]
    Compute(#[from] ComputeError),
}

/// Reduces a subnetwork reference to its bare name.
///
/// Accepts `projects/<p>/regions/<r>/subnetworks/<n>` (bare or as a full
/// self-link), `<p>/<r>/<n>`, `<r>/<n>`, and `<n>`.
///
/// # Errors
///
/// Returns [`PreflightError::InvalidSubnetReference`] for empty references,
/// empty segments, or any other shape.
pub fn normalize_subnet_name(reference: &str) -> Result<String, PreflightError> {
    let reference = reference.trim();
    let invalid = || PreflightError::InvalidSubnetReference(reference.to_owned());
    let parts: Vec<&str> = resource_path(reference).split('/').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(invalid());
    }
    match parts.as_slice() {
        ["projects", _, "regions", _, "subnetworks", name] => Ok((*name).to_owned()),
        [first, _, name] | [first, name] if *first != "projects" => Ok((*name).to_owned()),
        [name] => Ok((*name).to_owned()),
        _ => Err(invalid()),
    }
}

fn bare_network_name(reference: &str) -> &str {
    reference
        .trim()
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_NETWORK)
}

/// Validates network prerequisites through a [`ComputeApi`].
pub struct NetworkPreflight<'a, C: ComputeApi + ?Sized> {
    api: &'a C,
    project: String,
    network: String,
}

impl<'a, C: ComputeApi + ?Sized> NetworkPreflight<'a, C> {
    /// Creates a preflight for `network` in `project`. An empty network
    /// reference means the project's default network.
    #[must_use]
    pub fn new(api: &'a C, project: impl Into<String>, network: &str) -> Self {
        Self {
            api,
            project: project.into(),
            network: bare_network_name(network).to_owned(),
        }
    }

    /// Checks whether any NAT in `region` covers the subnet.
    ///
    /// # Errors
    ///
    /// Returns [`PreflightError::InvalidSubnetReference`] for malformed
    /// references and [`PreflightError::Compute`] when routers cannot be
    /// listed. A missing NAT is reported in the finding, not as an error.
    pub async fn check_nat(
        &self,
        region: &str,
        subnet_reference: &str,
    ) -> Result<PreflightFinding, PreflightError> {
        let subnet = normalize_subnet_name(subnet_reference)?;
        let routers = self.api.list_routers(region).await?;
        debug!(region, subnet = %subnet, routers = routers.len(), "inspecting NAT configuration");
        let status = nat_covering(&routers, &subnet)
            .map_or(FindingStatus::Missing, |matched| FindingStatus::Satisfied {
                matched,
            });
        Ok(PreflightFinding {
            check: PreflightCheck::Nat,
            status,
            remediation: Remediation::Nat(NatRemediation {
                project: self.project.clone(),
                region: region.to_owned(),
                network: self.network.clone(),
                subnet,
                router: NAT_ROUTER_NAME.to_owned(),
                nat: NAT_CONFIG_NAME.to_owned(),
            }),
        })
    }

    /// Checks whether an enabled ingress rule admits the proxy broker on the
    /// SSH port for instances carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError`] when firewall rules cannot be listed.
    pub async fn check_firewall(
        &self,
        tag: Option<&str>,
    ) -> Result<PreflightFinding, ComputeError> {
        let rules = self.api.list_firewalls().await?;
        let status = rules
            .iter()
            .find(|rule| admits_proxy(rule, &self.network, tag))
            .map_or(FindingStatus::Missing, |rule| FindingStatus::Satisfied {
                matched: rule.name.clone(),
            });
        Ok(PreflightFinding {
            check: PreflightCheck::Firewall,
            status,
            remediation: Remediation::Firewall(FirewallRemediation {
                project: self.project.clone(),
                network: self.network.clone(),
                rule: FIREWALL_RULE_NAME.to_owned(),
                source_range: IAP_SOURCE_RANGE.to_owned(),
                port: SSH_PORT,
                tag: tag.map(str::to_owned),
            }),
        })
    }

    /// Runs every check required by the request's connectivity mode.
    ///
    /// Direct mode needs no checks. Proxied mode requires a subnetwork and a
    /// covering NAT; a missing or unverifiable firewall rule is logged and
    /// does not fail the run.
    ///
    /// # Errors
    ///
    /// Returns [`PreflightError`] when proxied mode cannot work.
    pub async fn run(&self, request: &ProvisionRequest) -> Result<PreflightReport, PreflightError> {
        if request.mode() == ConnectivityMode::Direct {
            debug!(instance = %request.name, "public address requested; skipping network preflight");
            return Ok(PreflightReport::default());
        }
        if request.subnetwork.trim().is_empty() {
            return Err(PreflightError::MissingSubnetwork);
        }

        info!(region = request.region(), subnetwork = %request.subnetwork, "checking Cloud NAT");
        let nat = self.check_nat(request.region(), &request.subnetwork).await?;
        if !nat.is_satisfied() {
            return Err(PreflightError::NatMissing(Box::new(nat)));
        }
        info!(finding = %nat, "Cloud NAT present");

        let firewall = match self.check_firewall(request.tag.as_deref()).await {
            Ok(finding) if finding.is_satisfied() => {
                info!(finding = %finding, "IAP firewall rule present");
                Some(finding)
            }
            Ok(finding) => {
                warn!("IAP firewall rule not found\n{finding}");
                Some(finding)
            }
            Err(err) => {
                warn!(error = %err, "could not verify IAP firewall rules");
                None
            }
        };

        Ok(PreflightReport {
            nat: Some(nat),
            firewall,
        })
    }
}

fn nat_covering(routers: &[Router], subnet: &str) -> Option<String> {
    routers.iter().find_map(|router| {
        router
            .nats
            .iter()
            .find(|nat| match nat.source_subnetwork_ip_ranges_to_nat.as_str() {
                ALL_SUBNETWORKS => true,
                LIST_OF_SUBNETWORKS => nat
                    .subnetworks
                    .iter()
                    .any(|entry| entry.name.contains(subnet)),
                _ => false,
            })
            .map(|nat| format!("{}/{}", router.name, nat.name))
    })
}

fn admits_proxy(rule: &Firewall, network: &str, tag: Option<&str>) -> bool {
    if rule.disabled {
        return false;
    }
    if !(rule.direction.is_empty() || rule.direction.eq_ignore_ascii_case("INGRESS")) {
        return false;
    }
    if !rule.network.is_empty() && bare_network_name(&rule.network) != network {
        return false;
    }
    let targets_instance = rule.target_tags.is_empty()
        || tag.is_some_and(|wanted| rule.target_tags.iter().any(|tag| tag == wanted));
    if !targets_instance {
        return false;
    }
    let allows_ssh = || {
        rule.allowed
            .iter()
            .any(|allowed| covers_tcp_port(&allowed.ip_protocol, &allowed.ports, SSH_PORT))
    };
    if rule.name.contains(IAP_RULE_MARKER) {
        return true;
    }
    rule.source_ranges.iter().any(|range| range == IAP_SOURCE_RANGE) && allows_ssh()
}

fn covers_tcp_port(protocol: &str, ports: &[String], port: u16) -> bool {
    let protocol = protocol.to_ascii_lowercase();
    if !matches!(protocol.as_str(), "tcp" | "6" | "all") {
        return false;
    }
    if ports.is_empty() {
        return true;
    }
    ports.iter().any(|spec| match spec.split_once('-') {
        Some((low, high)) => match (low.trim().parse::<u16>(), high.trim().parse::<u16>()) {
            (Ok(low), Ok(high)) => (low..=high).contains(&port),
            _ => false,
        },
        None => spec.trim().parse::<u16>() == Ok(port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{FirewallAllowed, RouterNat, RouterNatSubnetwork};
    use crate::test_support::{
        ScriptedCompute, api_error, iap_firewall_rule, router_with_nat_for,
    };
    use rstest::rstest;

    fn nat(mode: &str, subnets: &[&str]) -> RouterNat {
        RouterNat {
            name: String::from("nat-1"),
            source_subnetwork_ip_ranges_to_nat: mode.to_owned(),
            subnetworks: subnets
                .iter()
                .map(|name| RouterNatSubnetwork {
                    name: format!(
                        "https://www.googleapis.com/compute/v1/projects/acme/regions/europe-west1/subnetworks/{name}"
                    ),
                })
                .collect(),
        }
    }

    fn router(nats: Vec<RouterNat>) -> Router {
        Router {
            name: String::from("router-1"),
            nats,
        }
    }

    fn rule(name: &str, ranges: &[&str], protocol: &str, ports: &[&str]) -> Firewall {
        Firewall {
            name: name.to_owned(),
            network: String::from(
                "https://www.googleapis.com/compute/v1/projects/acme/global/networks/default",
            ),
            direction: String::from("INGRESS"),
            disabled: false,
            source_ranges: ranges.iter().map(|range| (*range).to_owned()).collect(),
            allowed: vec![FirewallAllowed {
                ip_protocol: protocol.to_owned(),
                ports: ports.iter().map(|port| (*port).to_owned()).collect(),
            }],
            target_tags: Vec::new(),
        }
    }

    #[rstest]
    #[case("projects/acme/regions/europe-west1/subnetworks/private")]
    #[case("https://www.googleapis.com/compute/v1/projects/acme/regions/europe-west1/subnetworks/private")]
    #[case("acme/europe-west1/private")]
    #[case("europe-west1/private")]
    #[case("private")]
    #[case("  private  ")]
    fn subnet_forms_normalise_to_bare_name(#[case] reference: &str) {
        assert_eq!(normalize_subnet_name(reference), Ok(String::from("private")));
    }

    #[rstest]
    #[case("")]
    #[case("europe-west1//private")]
    #[case("projects/acme/regions/europe-west1/subnetworks")]
    #[case("a/b/c/d/e")]
    #[case("projects/acme")]
    #[case("https://www.googleapis.com/compute/v1/projects/acme/regions/europe-west1")]
    fn malformed_subnet_references_are_rejected(#[case] reference: &str) {
        assert!(matches!(
            normalize_subnet_name(reference),
            Err(PreflightError::InvalidSubnetReference(_))
        ));
    }

    #[test]
    fn all_subnetworks_nat_covers_any_subnet() {
        let routers = vec![router(vec![nat(ALL_SUBNETWORKS, &[])])];
        assert_eq!(
            nat_covering(&routers, "private"),
            Some(String::from("router-1/nat-1"))
        );
    }

    #[test]
    fn listed_nat_matches_by_substring_case_sensitively() {
        let routers = vec![router(vec![nat(LIST_OF_SUBNETWORKS, &["private"])])];
        assert!(nat_covering(&routers, "private").is_some());
        assert!(nat_covering(&routers, "Private").is_none());
        assert!(nat_covering(&routers, "other").is_none());
    }

    #[test]
    fn primary_ranges_only_nat_is_ignored() {
        let routers = vec![router(vec![nat("ALL_SUBNETWORKS_ALL_PRIMARY_IP_RANGES", &[])])];
        assert!(nat_covering(&routers, "private").is_none());
    }

    #[rstest]
    #[case(rule("gantry-allow-iap", &[], "tcp", &["22"]), true)]
    #[case(rule("ssh-from-iap", &[IAP_SOURCE_RANGE], "tcp", &["22"]), true)]
    #[case(rule("ssh-range", &[IAP_SOURCE_RANGE], "tcp", &["20-30"]), true)]
    #[case(rule("all-tcp", &[IAP_SOURCE_RANGE], "tcp", &[]), true)]
    #[case(rule("everything", &[IAP_SOURCE_RANGE], "all", &[]), true)]
    #[case(rule("https-only", &[IAP_SOURCE_RANGE], "tcp", &["443"]), false)]
    #[case(rule("udp", &[IAP_SOURCE_RANGE], "udp", &["22"]), false)]
    #[case(rule("world-ssh", &["0.0.0.0/0"], "tcp", &["22"]), false)]
    fn firewall_rule_matching(#[case] candidate: Firewall, #[case] expected: bool) {
        assert_eq!(admits_proxy(&candidate, "default", None), expected);
    }

    #[test]
    fn disabled_egress_or_foreign_network_rules_do_not_count() {
        let mut disabled = rule("gantry-allow-iap", &[], "tcp", &["22"]);
        disabled.disabled = true;
        let mut egress = rule("gantry-allow-iap", &[], "tcp", &["22"]);
        egress.direction = String::from("EGRESS");
        let foreign = rule("gantry-allow-iap", &[], "tcp", &["22"]);

        assert!(!admits_proxy(&disabled, "default", None));
        assert!(!admits_proxy(&egress, "default", None));
        assert!(!admits_proxy(&foreign, "shared-vpc", None));
    }

    #[test]
    fn tagged_rule_requires_matching_instance_tag() {
        let mut tagged = rule("gantry-allow-iap", &[], "tcp", &["22"]);
        tagged.target_tags = vec![String::from("devbox")];
        assert!(admits_proxy(&tagged, "default", Some("devbox")));
        assert!(!admits_proxy(&tagged, "default", Some("web")));
        assert!(!admits_proxy(&tagged, "default", None));
    }

    fn proxied_request(public_ip: bool) -> ProvisionRequest {
        ProvisionRequest::builder()
            .name("box-1")
            .project("acme")
            .zone("europe-west1-b")
            .machine_type("e2-standard-4")
            .disk_size("40")
            .disk_image("family/ubuntu")
            .subnetwork("europe-west1/private")
            .public_ip(public_ip)
            .login_user("gantry")
            .workdir("/tmp/box-1")
            .build()
            .expect("request should build")
    }

    #[tokio::test]
    async fn direct_mode_skips_every_check() {
        let api = ScriptedCompute::new();
        let report = NetworkPreflight::new(&api, "acme", "")
            .run(&proxied_request(true))
            .await
            .expect("direct mode passes");

        assert_eq!(report, PreflightReport::default());
        assert_eq!((api.router_calls(), api.firewall_calls()), (0, 0));
    }

    #[tokio::test]
    async fn repeated_runs_report_identical_findings() {
        let api = ScriptedCompute::new()
            .with_routers(vec![router_with_nat_for("private")])
            .with_firewalls(vec![iap_firewall_rule()]);
        let preflight = NetworkPreflight::new(&api, "acme", "");
        let request = proxied_request(false);

        let first = preflight.run(&request).await.expect("first run");
        let second = preflight.run(&request).await.expect("second run");

        assert_eq!(first, second);
        assert!(first.nat.as_ref().is_some_and(PreflightFinding::is_satisfied));
        assert!(first.firewall.as_ref().is_some_and(PreflightFinding::is_satisfied));
        assert_eq!(api.insert_calls(), 0);
    }

    #[tokio::test]
    async fn missing_firewall_rule_is_advisory() {
        let api = ScriptedCompute::new().with_routers(vec![router_with_nat_for("private")]);

        let report = NetworkPreflight::new(&api, "acme", "")
            .run(&proxied_request(false))
            .await
            .expect("missing firewall is not fatal");

        let firewall = report.firewall.expect("firewall finding");
        assert_eq!(firewall.status, FindingStatus::Missing);
        assert!(firewall.to_string().contains("35.235.240.0/20"));
    }

    #[tokio::test]
    async fn firewall_listing_failure_is_advisory() {
        let api = ScriptedCompute::new()
            .with_routers(vec![router_with_nat_for("private")])
            .with_firewall_error(api_error("firewalls.list", 403));

        let report = NetworkPreflight::new(&api, "acme", "")
            .run(&proxied_request(false))
            .await
            .expect("unverifiable firewall is not fatal");

        assert!(report.firewall.is_none());
    }

    #[tokio::test]
    async fn router_listing_failure_is_distinct_from_missing_nat() {
        let api = ScriptedCompute::new().with_router_error(api_error("routers.list", 403));

        let err = NetworkPreflight::new(&api, "acme", "")
            .run(&proxied_request(false))
            .await
            .expect_err("listing fails");

        assert!(matches!(err, PreflightError::Compute(_)));
    }

    #[test]
    fn missing_finding_renders_remediation() {
        let finding = PreflightFinding {
            check: PreflightCheck::Nat,
            status: FindingStatus::Missing,
            remediation: Remediation::Nat(NatRemediation {
                project: String::from("acme"),
                region: String::from("europe-west1"),
                network: String::from("default"),
                subnet: String::from("private"),
                router: NAT_ROUTER_NAME.to_owned(),
                nat: NAT_CONFIG_NAME.to_owned(),
            }),
        };
        let err = PreflightError::NatMissing(Box::new(finding));
        assert!(err.to_string().contains("gcloud compute routers create"));
    }
}
