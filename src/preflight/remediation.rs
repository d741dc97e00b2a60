//! Copy-pasteable corrective command sequences for failed preflight checks.

use std::borrow::Cow;
use std::fmt;

use shell_escape::unix::escape;

/// Source range used by the proxy broker for TCP forwarding.
pub const IAP_SOURCE_RANGE: &str = "35.235.240.0/20";

/// Port the command channel listens on.
pub const SSH_PORT: u16 = 22;

/// Router created by the NAT remediation.
pub const NAT_ROUTER_NAME: &str = "gantry-nat-router";

/// NAT configuration created by the NAT remediation.
pub const NAT_CONFIG_NAME: &str = "gantry-nat-config";

/// Firewall rule created by the firewall remediation.
pub const FIREWALL_RULE_NAME: &str = "gantry-allow-iap";

fn quoted(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

/// Parameters for creating outbound NAT for a subnet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NatRemediation {
    /// Project owning the network.
    pub project: String,
    /// Region of the subnet.
    pub region: String,
    /// Network the router attaches to.
    pub network: String,
    /// Bare subnet name.
    pub subnet: String,
    /// Router name to create.
    pub router: String,
    /// NAT configuration name to create.
    pub nat: String,
}

impl fmt::Display for NatRemediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let project = quoted(&self.project);
        let region = quoted(&self.region);
        let router = quoted(&self.router);
        let nat = quoted(&self.nat);
        writeln!(
            f,
            "Cloud NAT is not configured for subnet '{}' in region '{}'.",
            self.subnet, self.region
        )?;
        writeln!(
            f,
            "Instances without an external address need Cloud NAT for outbound access."
        )?;
        writeln!(f)?;
        writeln!(f, "  gcloud compute routers create {router} \\")?;
        writeln!(f, "    --project={project} \\")?;
        writeln!(f, "    --region={region} \\")?;
        writeln!(f, "    --network={}", quoted(&self.network))?;
        writeln!(f)?;
        writeln!(f, "  gcloud compute routers nats create {nat} \\")?;
        writeln!(f, "    --router={router} \\")?;
        writeln!(f, "    --region={region} \\")?;
        writeln!(f, "    --nat-all-subnet-ip-ranges \\")?;
        writeln!(f, "    --auto-allocate-nat-external-ips \\")?;
        writeln!(f, "    --project={project}")?;
        writeln!(f)?;
        writeln!(f, "To cover only this subnet, use instead:")?;
        writeln!(f)?;
        writeln!(f, "  gcloud compute routers nats create {nat} \\")?;
        writeln!(f, "    --router={router} \\")?;
        writeln!(f, "    --region={region} \\")?;
        writeln!(
            f,
            "    --nat-custom-subnet-ip-ranges={} \\",
            quoted(&self.subnet)
        )?;
        writeln!(f, "    --auto-allocate-nat-external-ips \\")?;
        write!(f, "    --project={project}")
    }
}

/// Parameters for creating the ingress rule used by the proxy broker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirewallRemediation {
    /// Project owning the network.
    pub project: String,
    /// Network the rule applies to.
    pub network: String,
    /// Rule name to create.
    pub rule: String,
    /// Source range to allow.
    pub source_range: String,
    /// Port to allow.
    pub port: u16,
    /// Target tag; `None` applies the rule to every instance.
    pub tag: Option<String>,
}

impl fmt::Display for FirewallRemediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "No firewall rule admits {} on tcp:{}; tunnelled SSH will fail until one exists.",
            self.source_range, self.port
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "  gcloud compute firewall-rules create {} \\",
            quoted(&self.rule)
        )?;
        writeln!(f, "    --project={} \\", quoted(&self.project))?;
        writeln!(f, "    --direction=INGRESS \\")?;
        writeln!(f, "    --priority=1000 \\")?;
        writeln!(f, "    --network={} \\", quoted(&self.network))?;
        writeln!(f, "    --action=ALLOW \\")?;
        writeln!(f, "    --rules=tcp:{} \\", self.port)?;
        match &self.tag {
            Some(tag) => {
                writeln!(f, "    --source-ranges={} \\", self.source_range)?;
                write!(f, "    --target-tags={}", quoted(tag))
            }
            None => write!(f, "    --source-ranges={}", self.source_range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nat() -> NatRemediation {
        NatRemediation {
            project: String::from("acme"),
            region: String::from("europe-west1"),
            network: String::from("default"),
            subnet: String::from("private"),
            router: NAT_ROUTER_NAME.to_owned(),
            nat: NAT_CONFIG_NAME.to_owned(),
        }
    }

    #[test]
    fn nat_remediation_lists_router_and_nat_commands() {
        let text = nat().to_string();
        assert!(text.contains("gcloud compute routers create gantry-nat-router"));
        assert!(text.contains("--network=default"));
        assert!(text.contains("gcloud compute routers nats create gantry-nat-config"));
        assert!(text.contains("--nat-all-subnet-ip-ranges"));
        assert!(text.contains("--nat-custom-subnet-ip-ranges=private"));
        assert!(text.contains("--project=acme"));
    }

    #[test]
    fn remediation_quotes_unsafe_values() {
        let text = NatRemediation {
            network: String::from("my net"),
            ..nat()
        }
        .to_string();
        assert!(text.contains("--network='my net'"));
    }

    #[test]
    fn firewall_remediation_includes_tag_when_present() {
        let mut remediation = FirewallRemediation {
            project: String::from("acme"),
            network: String::from("default"),
            rule: FIREWALL_RULE_NAME.to_owned(),
            source_range: IAP_SOURCE_RANGE.to_owned(),
            port: SSH_PORT,
            tag: Some(String::from("devbox")),
        };
        let tagged = remediation.to_string();
        assert!(tagged.contains("--rules=tcp:22"));
        assert!(tagged.contains("--source-ranges=35.235.240.0/20"));
        assert!(tagged.ends_with("--target-tags=devbox"));

        remediation.tag = None;
        let untagged = remediation.to_string();
        assert!(!untagged.contains("--target-tags"));
        assert!(untagged.ends_with("--source-ranges=35.235.240.0/20"));
    }
}
