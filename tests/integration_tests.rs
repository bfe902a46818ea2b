//! Integration tests for treefw
//!
//! These tests drive the public API end to end: JSON document in, compiled
//! policy, iptables-restore text and output directory out.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use std::path::Path;
use treefw::core::document::TestCaseDocument;
use treefw::core::firewall::{Chain, PortSide, StateMatch};
use treefw::core::restore;
use treefw::core::testcases::{
    MANIFEST_FILE, checksum, list_testcases, load_testcase, read_outputs, write_outputs,
};
use treefw::core::verify::verify_policy;
use treefw::report::{CompileReport, EventType, log_failure, log_success};
use treefw::{CompilerConfig, Error, compile};

/// R1 joins S1 and S2, R2 joins S2 and S3; S1 may reach S3 on tcp/80.
const SCENARIO: &str = r#"{
    "network": {
        "routers": [{ "id": 1 }, { "id": 2 }],
        "subnets": [
            { "id": 1, "address": "192.168.1.0", "prefix": 24 },
            { "id": 2, "address": "192.168.2.0", "prefix": 24 },
            { "id": 3, "address": "192.168.3.0", "prefix": 24 }
        ],
        "links": [
            { "routerId": 1, "subnetId": 1, "interfaceId": "eth0", "ip": "192.168.1.1" },
            { "routerId": 1, "subnetId": 2, "interfaceId": "eth1", "ip": "192.168.2.1" },
            { "routerId": 2, "subnetId": 2, "interfaceId": "eth0", "ip": "192.168.2.2" },
            { "routerId": 2, "subnetId": 3, "interfaceId": "eth1", "ip": "192.168.3.1" }
        ]
    },
    "communications": [
        { "sourceSubnetId": 1, "targetSubnetId": 3, "protocol": "tcp", "port": 80, "direction": "unidirectional" }
    ]
}"#;

fn scenario() -> TestCaseDocument {
    serde_json::from_str(SCENARIO).unwrap()
}

fn write_case(dir: &Path, id: &str, doc: &str) {
    std::fs::write(dir.join(format!("{id}.json")), doc).unwrap();
}

#[test]
fn test_two_router_scenario() {
    let compiled = compile(&scenario(), &CompilerConfig::default()).unwrap();

    let expected = [("1", "eth0", "eth1"), ("2", "eth0", "eth1")];
    for (router, to_source, to_destination) in expected {
        let device = compiled.policy.device(router).unwrap();
        let rules = &device.rules;

        let forward = &rules[0];
        assert_eq!(forward.chain, Chain::Forward);
        assert_eq!(forward.matcher.in_interface.as_deref(), Some(to_source));
        assert_eq!(forward.matcher.out_interface.as_deref(), Some(to_destination));
        assert_eq!(forward.matcher.source.as_ref().unwrap().id, "1");
        assert_eq!(forward.matcher.destination.as_ref().unwrap().id, "3");
        let ports = forward.matcher.ports.as_ref().unwrap();
        assert_eq!(ports.side, PortSide::Destination);
        assert!(ports.ports.contains(80));

        let reverse = &rules[1];
        assert_eq!(reverse.matcher.state, StateMatch::Established);
        assert_eq!(reverse.matcher.in_interface.as_deref(), Some(to_destination));
        assert_eq!(reverse.matcher.out_interface.as_deref(), Some(to_source));

        assert!(rules[2..].iter().all(|r| r.is_deny_all()));
        for chain in Chain::ALL {
            assert!(device.chain(chain).last().unwrap().is_deny_all());
        }
    }

    assert!(verify_policy(&compiled).success);
}

#[test]
fn test_unknown_subnet_yields_no_rules() {
    let mut doc = scenario();
    doc.communications[0].target_subnet_id = "42".to_string();

    let err = compile(&doc, &CompilerConfig::default()).unwrap_err();
    assert!(err.to_string().contains("42"), "{}", err);
    assert_eq!(err.kind(), "flow_validation");
}

#[test]
fn test_cyclic_topology_rejected() {
    let mut doc = scenario();
    // A third router bridging S1 and S3 closes a loop
    doc.network.routers.push(serde_json::from_str(r#"{ "id": 3 }"#).unwrap());
    doc.network.links.push(
        serde_json::from_str(r#"{ "routerId": 3, "subnetId": 1, "interfaceId": "eth0" }"#).unwrap(),
    );
    doc.network.links.push(
        serde_json::from_str(r#"{ "routerId": 3, "subnetId": 3, "interfaceId": "eth1" }"#).unwrap(),
    );

    let err = compile(&doc, &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Topology(_)));
    assert!(err.to_string().contains("router 3 -- subnet 3"));
}

#[test]
fn test_restore_text_is_loadable_shape() {
    let config = CompilerConfig::default();
    let compiled = compile(&scenario(), &config).unwrap();
    let files = restore::render_policy(&compiled.policy, &config);

    assert_eq!(files.len(), 2);
    for (_, text) in &files {
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "*nat");
        assert!(lines.contains(&"*filter"));
        assert!(lines.contains(&":FORWARD DROP [0:0]"));
        assert_eq!(lines.iter().filter(|l| **l == "COMMIT").count(), 2);
        assert!(text.contains("--ctstate ESTABLISHED,RELATED"));
        assert!(text.contains("-s 192.168.1.0/24 -d 192.168.3.0/24 -p tcp -m tcp --dport 80"));
    }
}

#[tokio::test]
async fn test_compile_directory_end_to_end() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_case(input.path(), "1", SCENARIO);
    write_case(input.path(), "2", &SCENARIO.replace("\"targetSubnetId\": 3", "\"targetSubnetId\": 9"));
    std::fs::write(input.path().join("README.md"), "not a test case").unwrap();

    let ids = list_testcases(input.path()).await.unwrap();
    assert_eq!(ids, vec!["1", "2"]);

    let config = CompilerConfig::default();
    let report = CompileReport::new(output.path());
    for id in &ids {
        let doc = load_testcase(input.path(), id).await.unwrap();
        match compile(&doc, &config) {
            Ok(compiled) => {
                let files = restore::render_policy(&compiled.policy, &config);
                write_outputs(output.path(), id, files).await.unwrap();
                log_success(&report, id, 2, compiled.flows.len(), compiled.policy.rule_count())
                    .await;
            }
            Err(e) => log_failure(&report, id, &e).await,
        }
    }

    let case_dir = output.path().join("1");
    for router in ["1", "2"] {
        let text = std::fs::read_to_string(case_dir.join(router)).unwrap();
        assert!(text.ends_with("COMMIT\n"));
    }
    let manifest = std::fs::read_to_string(case_dir.join(MANIFEST_FILE)).unwrap();
    let router_1 = std::fs::read_to_string(case_dir.join("1")).unwrap();
    assert!(manifest.contains(&format!("{}  1", checksum(&router_1))));

    // The failing case produced nothing
    assert!(!output.path().join("2").exists());

    let events = report.read_recent(10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::CompileFailed);
    assert_eq!(events[1].event_type, EventType::CompileSucceeded);

    let on_disk = read_outputs(output.path(), "1").await.unwrap();
    let compiled = compile(&scenario(), &config).unwrap();
    assert_eq!(on_disk, restore::render_policy(&compiled.policy, &config));
}

#[test]
fn test_string_ids_and_derived_interfaces() {
    let doc: TestCaseDocument = serde_json::from_str(
        r#"{
            "network": {
                "routers": [{ "id": "core" }],
                "subnets": [
                    { "id": "lan", "address": "10.1.0.0", "prefix": 16 },
                    { "id": "dmz", "address": "10.2.0.0", "prefix": 16 }
                ],
                "links": [
                    { "routerId": "core", "subnetId": "lan" },
                    { "routerId": "core", "subnetId": "dmz" }
                ]
            },
            "communications": [
                { "sourceSubnetId": "lan", "targetSubnetId": "dmz", "protocol": "udp", "port": "53,123", "direction": "bidirectional" }
            ]
        }"#,
    )
    .unwrap();

    let config = CompilerConfig::default();
    let compiled = compile(&doc, &config).unwrap();
    let core = compiled.policy.device("core").unwrap();
    assert_eq!(core.permits().count(), 2);

    let text = restore::render_device(core, &config);
    assert!(text.contains("-A FORWARD -i snlan -o sndmz -s 10.1.0.0/16 -d 10.2.0.0/16 -p udp -m multiport --dports 53,123"));
    assert!(text.contains("-A FORWARD -i sndmz -o snlan"));
    assert!(verify_policy(&compiled).success);
}
