use log::info;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::utils::command;
use crate::utils::error::AppResult;

/// A tc ingress redirect: traffic to `source` is rewritten to `route`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RedirectRule {
    pub interface: String,
    pub priority: u16,
    pub source: Ipv4Addr,
    pub route: Ipv4Addr,
}

impl RedirectRule {
    /// tc arguments for `verb` ("add" or "delete")
    pub fn tc_args(&self, verb: &str) -> Vec<String> {
        vec![
            "filter".into(),
            verb.into(),
            "dev".into(),
            self.interface.clone(),
            "parent".into(),
            "ffff:".into(),
            "protocol".into(),
            "ip".into(),
            "prio".into(),
            self.priority.to_string(),
            "u32".into(),
            "match".into(),
            "ip".into(),
            "dst".into(),
            self.source.to_string(),
            "action".into(),
            "nat".into(),
            "ingress".into(),
            self.source.to_string(),
            self.route.to_string(),
        ]
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (prio {} on {})",
            self.source, self.route, self.priority, self.interface
        )
    }
}

/// Installs and removes redirect rules on the host
pub trait RuleInstaller: Send + Sync {
    fn add(&self, rule: &RedirectRule) -> AppResult<()>;
    fn delete(&self, rule: &RedirectRule) -> AppResult<()>;
}

/// Rule installer backed by the `tc` command
#[derive(Debug, Default)]
pub struct TcRuleInstaller;

impl TcRuleInstaller {
    fn run(&self, verb: &str, rule: &RedirectRule) -> AppResult<()> {
        let args = rule.tc_args(verb);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("tc filter {}: {}", verb, rule);
        command::run("tc", &args).map(|_| ())
    }
}

impl RuleInstaller for TcRuleInstaller {
    fn add(&self, rule: &RedirectRule) -> AppResult<()> {
        self.run("add", rule)
    }

    fn delete(&self, rule: &RedirectRule) -> AppResult<()> {
        self.run("delete", rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nat_ingress_redirect() {
        let rule = RedirectRule {
            interface: "eth1".into(),
            priority: 2,
            source: Ipv4Addr::new(239, 1, 1, 2),
            route: Ipv4Addr::new(10, 10, 0, 1),
        };

        assert_eq!(
            rule.tc_args("add").join(" "),
            "filter add dev eth1 parent ffff: protocol ip prio 2 u32 \
             match ip dst 239.1.1.2 action nat ingress 239.1.1.2 10.10.0.1"
        );
        assert_eq!(rule.tc_args("delete")[1], "delete");
    }
}
