//! Property-based tests for the config document round-trip laws.

use flywall::core::document::ConfigDocument;
use flywall::core::model::{Config, DhcpScopeConfig, InterfaceConfig, PolicyAction, ZoneConfig};
use proptest::prelude::*;

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

fn cidr_strategy() -> impl Strategy<Value = String> {
    (1u8..=254, 0u8..=254, 1u8..=254, prop::sample::select(vec![8u8, 16, 24, 32]))
        .prop_map(|(a, b, c, prefix)| format!("{a}.{b}.{c}.1/{prefix}"))
}

prop_compose! {
    fn zone_strategy()(description in "[ -~]{0,24}", drop in any::<bool>()) -> ZoneConfig {
        ZoneConfig {
            description,
            default_action: if drop { PolicyAction::Drop } else { PolicyAction::Accept },
        }
    }
}

prop_compose! {
    fn interface_strategy()(
        addrs in prop::collection::vec(cidr_strategy(), 0..3),
        dhcp_client in any::<bool>(),
        enabled in any::<bool>(),
        mtu in prop::option::of(576u32..=9000),
    ) -> InterfaceConfig {
        InterfaceConfig {
            ipv4: addrs,
            dhcp_client,
            enabled,
            mtu,
            ..InterfaceConfig::default()
        }
    }
}

fn config_strategy() -> impl Strategy<Value = Config> {
    (
        prop::collection::btree_map(name_strategy(), zone_strategy(), 0..4),
        prop::collection::btree_map(name_strategy(), interface_strategy(), 0..4),
        prop::collection::vec(cidr_strategy(), 0..3),
    )
        .prop_map(|(zones, interfaces, dns_servers)| {
            let mut config = Config::default();
            for (name, zone) in zones {
                config.zones.insert(name, zone);
            }
            for (name, interface) in interfaces {
                config.interfaces.insert(name, interface);
            }
            config.dns.servers = dns_servers;
            config
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_document_parse_render_round_trip(config in config_strategy()) {
        let doc = ConfigDocument::from_config(&config).unwrap();
        let reparsed = ConfigDocument::parse(&doc.render()).unwrap();
        prop_assert_eq!(doc, reparsed);
    }

    #[test]
    fn prop_config_survives_round_trip(config in config_strategy()) {
        let doc = ConfigDocument::from_config(&config).unwrap();
        let restored = ConfigDocument::parse(&doc.render())
            .unwrap()
            .to_config()
            .unwrap();
        prop_assert_eq!(config, restored);
    }

    #[test]
    fn prop_set_own_section_is_noop(config in config_strategy()) {
        let doc = ConfigDocument::from_config(&config).unwrap();
        let before = doc.render();
        for section in &doc.sections {
            let mut edited = doc.clone();
            edited.set_section(&section.kind, section.label.as_deref(), &section.body);
            prop_assert_eq!(&before, &edited.render());
        }
    }

    #[test]
    fn prop_sync_is_idempotent(config in config_strategy()) {
        let mut doc = ConfigDocument::from_config(&config).unwrap();
        let once = doc.render();
        doc.sync_with(&config).unwrap();
        prop_assert_eq!(once, doc.render());
    }
}

#[test]
fn test_dhcp_scope_duration_round_trips() {
    // humantime-formatted durations survive render and reparse.
    let mut config = Config::default();
    config
        .interfaces
        .insert("lan0".to_string(), InterfaceConfig::default());
    config.dhcp.insert(
        "lan".to_string(),
        DhcpScopeConfig {
            interface: "lan0".to_string(),
            range_start: "10.0.0.100".to_string(),
            range_end: "10.0.0.200".to_string(),
            lease_time: std::time::Duration::from_secs(3600),
            gateway: None,
            dns_servers: vec![],
            enabled: true,
        },
    );

    let doc = ConfigDocument::from_config(&config).unwrap();
    let restored = ConfigDocument::parse(&doc.render())
        .unwrap()
        .to_config()
        .unwrap();
    assert_eq!(config, restored);
}
