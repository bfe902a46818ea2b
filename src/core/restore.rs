//! iptables-restore rendering
//!
//! Each router's rules become one file loadable with `iptables-restore`:
//!
//! ```text
//! *nat
//! :PREROUTING ACCEPT [0:0]
//! :OUTPUT ACCEPT [0:0]
//! :POSTROUTING ACCEPT [0:0]
//! COMMIT
//! *filter
//! :INPUT DROP [0:0]
//! :FORWARD DROP [0:0]
//! :OUTPUT DROP [0:0]
//! -A FORWARD -i eth0 -o eth1 -s 10.0.1.0/24 -d 10.0.3.0/24 -p tcp -m tcp --dport 80 -j ACCEPT
//! ...
//! -A INPUT -j DROP
//! -A FORWARD -j DROP
//! -A OUTPUT -j DROP
//! COMMIT
//! ```
//!
//! The `multiport` match holds at most 15 ports (a range counts twice), so
//! larger port sets are spread over consecutive lines admitting the same
//! union.

use crate::config::CompilerConfig;
use crate::core::error::Result;
use crate::core::firewall::{
    Chain, PortRange, PortSet, PortSide, Protocol, Rule, StateMatch,
};
use crate::core::policy::{CompiledPolicy, DevicePolicy};
use crate::validators::sanitize_comment;

/// Slot capacity of one `-m multiport` match
pub const MULTIPORT_MAX_SLOTS: usize = 15;

/// Renders the restore file of one router.
pub fn render_device(device: &DevicePolicy, config: &CompilerConfig) -> String {
    let mut lines: Vec<String> = Vec::new();

    if config.include_nat_table {
        lines.push("*nat".to_string());
        for chain in ["PREROUTING", "OUTPUT", "POSTROUTING"] {
            lines.push(format!(":{chain} ACCEPT [0:0]"));
        }
        lines.push("COMMIT".to_string());
    }

    lines.push("*filter".to_string());
    lines.extend(Chain::ALL.iter().map(|chain| format!(":{chain} DROP [0:0]")));
    for rule in &device.rules {
        lines.extend(rule_lines(rule, config.emit_comments));
    }
    lines.push("COMMIT".to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Renders every router, in policy order, as `(router id, file contents)`.
pub fn render_policy(policy: &CompiledPolicy, config: &CompilerConfig) -> Vec<(String, String)> {
    policy
        .devices
        .iter()
        .map(|d| (d.device.clone(), render_device(d, config)))
        .collect()
}

/// Pretty JSON export of the compiled policy
pub fn to_json(policy: &CompiledPolicy) -> Result<String> {
    Ok(serde_json::to_string_pretty(policy)?)
}

/// Renders one rule as one or more `-A` lines.
pub fn rule_lines(rule: &Rule, emit_comments: bool) -> Vec<String> {
    let mut head = format!("-A {}", rule.chain);
    let m = &rule.matcher;
    if let Some(ref iface) = m.in_interface {
        head.push_str(&format!(" -i {iface}"));
    }
    if let Some(ref iface) = m.out_interface {
        head.push_str(&format!(" -o {iface}"));
    }
    if let Some(ref source) = m.source {
        head.push_str(&format!(" -s {}", source.network));
    }
    if let Some(ref destination) = m.destination {
        head.push_str(&format!(" -d {}", destination.network));
    }
    if m.protocol != Protocol::All {
        head.push_str(&format!(" -p {}", m.protocol));
    }

    let mut tail = String::new();
    if m.state == StateMatch::Established {
        tail.push_str(" -m conntrack --ctstate ESTABLISHED,RELATED");
    }
    if emit_comments {
        let comment = if rule.is_deny_all() {
            "default deny".to_string()
        } else {
            let flows: Vec<String> = rule.flows.iter().map(ToString::to_string).collect();
            format!("flows {}", flows.join(","))
        };
        tail.push_str(&format!(
            " -m comment --comment \"{}\"",
            sanitize_comment(&comment)
        ));
    }
    tail.push_str(" -j ");
    tail.push_str(rule.action.target());

    let Some(ref ports) = m.ports else {
        return vec![format!("{head}{tail}")];
    };

    let (short, long) = match ports.side {
        PortSide::Destination => ("--dport", "--dports"),
        PortSide::Source => ("--sport", "--sports"),
    };
    if let [range] = ports.ports.ranges() {
        return vec![format!(
            "{head} -m {} {short} {}{tail}",
            m.protocol,
            iptables_range(*range)
        )];
    }

    multiport_chunks(&ports.ports)
        .into_iter()
        .map(|chunk| {
            let list: Vec<String> = chunk.into_iter().map(iptables_range).collect();
            format!("{head} -m multiport {long} {}{tail}", list.join(","))
        })
        .collect()
}

/// iptables writes ranges as `first:last`
fn iptables_range(range: PortRange) -> String {
    if range.is_single() {
        range.start.to_string()
    } else {
        format!("{}:{}", range.start, range.end)
    }
}

fn multiport_chunks(ports: &PortSet) -> Vec<Vec<PortRange>> {
    let mut chunks: Vec<Vec<PortRange>> = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;
    for &range in ports.ranges() {
        let cost = if range.is_single() { 1 } else { 2 };
        if used + cost > MULTIPORT_MAX_SLOTS {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(range);
        used += cost;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compile::compile;
    use crate::core::firewall::PortMatch;
    use crate::core::test_helpers::{permit, scenario_document};

    #[test]
    fn test_scenario_restore_text() {
        let compiled = compile(&scenario_document(), &CompilerConfig::default()).unwrap();
        let text = render_device(
            compiled.policy.device("1").unwrap(),
            &CompilerConfig::default(),
        );
        let expected = "\
*nat
:PREROUTING ACCEPT [0:0]
:OUTPUT ACCEPT [0:0]
:POSTROUTING ACCEPT [0:0]
COMMIT
*filter
:INPUT DROP [0:0]
:FORWARD DROP [0:0]
:OUTPUT DROP [0:0]
-A FORWARD -i eth0 -o eth1 -s 10.0.1.0/24 -d 10.0.3.0/24 -p tcp -m tcp --dport 80 -m comment --comment \"flows 0\" -j ACCEPT
-A FORWARD -i eth1 -o eth0 -s 10.0.3.0/24 -d 10.0.1.0/24 -p tcp -m tcp --sport 80 -m conntrack --ctstate ESTABLISHED,RELATED -m comment --comment \"flows 0\" -j ACCEPT
-A INPUT -m comment --comment \"default deny\" -j DROP
-A FORWARD -m comment --comment \"default deny\" -j DROP
-A OUTPUT -m comment --comment \"default deny\" -j DROP
COMMIT
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_without_nat_and_comments() {
        let config = CompilerConfig {
            emit_comments: false,
            include_nat_table: false,
            ..CompilerConfig::default()
        };
        let compiled = compile(&scenario_document(), &config).unwrap();
        let text = render_device(compiled.policy.device("2").unwrap(), &config);

        assert!(text.starts_with("*filter\n"));
        assert!(!text.contains("--comment"));
        assert!(text.contains("-A FORWARD -j DROP\n"));
        assert!(text.ends_with("-A OUTPUT -j DROP\nCOMMIT\n"));
    }

    #[test]
    fn test_any_protocol_has_no_proto_match() {
        let rule = permit("1", "1", "3", Protocol::All, None);
        let lines = rule_lines(&rule, false);
        assert_eq!(
            lines,
            vec!["-A FORWARD -i eth0 -o eth1 -s 10.0.1.0/24 -d 10.0.3.0/24 -j ACCEPT"]
        );
    }

    #[test]
    fn test_port_range_uses_colon() {
        let mut rule = permit("1", "1", "3", Protocol::Udp, None);
        rule.matcher.ports = Some(PortMatch {
            side: PortSide::Destination,
            ports: "5000-5010".parse().unwrap(),
        });
        let lines = rule_lines(&rule, false);
        assert!(lines[0].contains("-p udp -m udp --dport 5000:5010 -j ACCEPT"));
    }

    #[test]
    fn test_large_port_sets_split_losslessly() {
        let mut rule = permit("1", "1", "3", Protocol::Tcp, None);
        let ports: Vec<String> = (1..=20u16).map(|p| (p * 10).to_string()).collect();
        let mut spec = ports.join(",");
        spec.push_str(",1000-2000");
        rule.matcher.ports = Some(PortMatch {
            side: PortSide::Destination,
            ports: spec.parse().unwrap(),
        });

        let lines = rule_lines(&rule, false);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("--dports 10,20,"));
        assert!(lines[1].ends_with("1000:2000 -j ACCEPT"));

        let listed: usize = lines
            .iter()
            .map(|l| {
                let list = l.split("--dports ").nth(1).unwrap().split(' ').next().unwrap();
                list.split(',')
                    .map(|p| if p.contains(':') { 2 } else { 1 })
                    .sum::<usize>()
            })
            .inspect(|slots| assert!(*slots <= MULTIPORT_MAX_SLOTS))
            .sum();
        assert_eq!(listed, 22);
    }

    #[test]
    fn test_json_export_names_chains() {
        let compiled = compile(&scenario_document(), &CompilerConfig::default()).unwrap();
        let json = to_json(&compiled.policy).unwrap();
        assert!(json.contains("\"FORWARD\""));
        assert!(json.contains("\"established\""));
    }
}
