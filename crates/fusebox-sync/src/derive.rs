//! Indices derived from the merged channel map.

use crate::model::{ChannelEntry, ChannelMap, LiveStates, ServiceCatalog, WritableServices};

/// Services that also report a live value.
#[must_use]
pub fn filter_services(services: &ServiceCatalog, live_states: &LiveStates) -> ServiceCatalog {
    live_states
        .keys()
        .filter_map(|key| {
            services
                .get(key)
                .map(|service| (key.clone(), service.clone()))
        })
        .collect()
}

/// Setpoint registers (`s`, `s!`).
#[must_use]
pub fn is_setpoint(entry: &ChannelEntry) -> bool {
    matches!(entry.regtype(), Some("s" | "s!"))
}

/// Modbus holding registers or coils that have an output row.
#[must_use]
pub fn is_writable_modbus(entry: &ChannelEntry) -> bool {
    entry.chantype() == Some("mb") && matches!(entry.regtype(), Some("h" | "c")) && entry.output
}

/// Live values of this entry are output states.
#[must_use]
pub fn is_writable(entry: &ChannelEntry) -> bool {
    is_setpoint(entry) || is_writable_modbus(entry)
}

/// Writable member indices per channel key.
///
/// Setpoints are collected first, modbus outputs second; each list is
/// deduplicated and keeps discovery order.
#[must_use]
pub fn writable_services(channels: &ChannelMap) -> WritableServices {
    let mut writable = WritableServices::new();
    for rule in [is_setpoint as fn(&ChannelEntry) -> bool, is_writable_modbus] {
        for (key, members) in channels {
            for (index, entry) in members {
                if !rule(entry) {
                    continue;
                }
                let indices = writable.entry(key.clone()).or_default();
                if !indices.contains(index) {
                    indices.push(*index);
                }
            }
        }
    }
    writable
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::model::{ChannelKind, LiveState, RegisterDescriptor};

    fn entry(regtype: &str, chantype: &str, output: bool) -> ChannelEntry {
        ChannelEntry {
            register: RegisterDescriptor {
                regtype: Some(regtype.into()),
                chantype: Some(chantype.into()),
                ..RegisterDescriptor::default()
            },
            kind: ChannelKind::Analogue,
            output,
        }
    }

    #[test]
    fn writable_rule_covers_setpoints_and_modbus_outputs() {
        let mut channels = ChannelMap::new();
        channels.insert(
            "A".into(),
            BTreeMap::from([
                (1, entry("h", "mb", true)),
                (2, entry("h", "mb", false)),
                (3, entry("s!", "vc", false)),
                (4, entry("c", "xx", true)),
                (5, entry("i", "mb", true)),
            ]),
        );
        channels.insert("B".into(), BTreeMap::from([(7, entry("s", "mb", true))]));
        channels.insert("C".into(), BTreeMap::from([(1, entry("i", "mb", false))]));

        let writable = writable_services(&channels);

        assert_eq!(writable.len(), 2);
        assert_eq!(writable["A"], vec![3, 1]);
        assert_eq!(writable["B"], vec![7]);
        assert!(!writable.contains_key("C"));
    }

    #[test]
    fn filtered_services_intersect_with_live_states() {
        let services: ServiceCatalog = serde_json::from_value(json!({
            "ABCW": {"servicename": "Power"},
            "TEMP": {"servicename": "Temperature"}
        }))
        .unwrap();
        let mut live = LiveStates::new();
        live.insert("TEMP".into(), LiveState::default());
        live.insert("UNKNOWN".into(), LiveState::default());

        let filtered = filter_services(&services, &live);

        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["TEMP"]);
        assert_eq!(filtered["TEMP"], services["TEMP"]);
    }
}
