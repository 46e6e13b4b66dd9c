//! Merge of the four register tables into one channel map.
//!
//! Input tables (`aicochannels`, `dichannels`) populate `channels[key][member]`.
//! Each output-table row then marks the first input row with the same
//! `(mbi, mba, regadd)` address (plus `bit` for discrete registers) as an
//! output. The controller mixes numbers and numeric strings in address
//! fields; a string is compared numerically only against a number.

use serde_json::Value;
use tracing::warn;

use crate::model::{ChannelEntry, ChannelKind, ChannelMap, RegisterDescriptor, RegisterTables};

/// Build the channel map from the raw tables. Pure and deterministic.
#[must_use]
pub fn merge_channels(tables: &RegisterTables) -> ChannelMap {
    let mut channels = ChannelMap::new();
    for row in &tables.aicochannels {
        insert_input(&mut channels, row, ChannelKind::Analogue);
    }
    for row in &tables.dichannels {
        insert_input(&mut channels, row, ChannelKind::Discrete);
    }
    mark_outputs(
        &mut channels,
        &tables.aicochannels,
        &tables.aochannels,
        ChannelKind::Analogue,
    );
    mark_outputs(
        &mut channels,
        &tables.dichannels,
        &tables.dochannels,
        ChannelKind::Discrete,
    );
    channels
}

fn insert_input(channels: &mut ChannelMap, row: &RegisterDescriptor, kind: ChannelKind) {
    let Some(index) = row.member_index() else {
        warn!(key = %row.val_reg, member = %row.member, "register row skipped, invalid member");
        return;
    };
    let members = channels.entry(row.val_reg.clone()).or_default();
    if let Some(existing) = members.get(&index) {
        warn!(
            key = %row.val_reg,
            index,
            kept = ?existing.kind,
            dropped = ?kind,
            "duplicate channel index, keeping first entry"
        );
        return;
    }
    members.insert(
        index,
        ChannelEntry {
            register: row.clone(),
            kind,
            output: false,
        },
    );
}

fn mark_outputs(
    channels: &mut ChannelMap,
    inputs: &[RegisterDescriptor],
    outputs: &[RegisterDescriptor],
    kind: ChannelKind,
) {
    for output in outputs {
        let Some(input) = inputs.iter().find(|input| same_address(input, output, kind)) else {
            continue;
        };
        let Some(index) = input.member_index() else {
            continue;
        };
        let entry = channels
            .get_mut(&input.val_reg)
            .and_then(|members| members.get_mut(&index));
        if let Some(entry) = entry.filter(|entry| entry.kind == kind) {
            entry.output = true;
        }
    }
}

/// Discrete registers also pair on `bit`.
fn same_address(input: &RegisterDescriptor, output: &RegisterDescriptor, kind: ChannelKind) -> bool {
    loose_eq(input.mbi.as_ref(), output.mbi.as_ref())
        && loose_eq(input.mba.as_ref(), output.mba.as_ref())
        && loose_eq(input.regadd.as_ref(), output.regadd.as_ref())
        && (kind == ChannelKind::Analogue || loose_eq(input.bit.as_ref(), output.bit.as_ref()))
}

/// Loose equality in the JavaScript sense: two strings compare
/// as text, a string against a number or boolean compares numerically, and a
/// missing field only equals another missing field or `null`.
fn loose_eq(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (None | Some(Value::Null), _) | (_, None | Some(Value::Null)) => false,
        (Some(Value::String(a)), Some(Value::String(b))) => a == b,
        (Some(a), Some(b)) => match (numeric(a), numeric(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Numeric value of a scalar; `None` for NaN and compound values.
fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().ok()?
            }
        }
        _ => return None,
    };
    (!number.is_nan()).then_some(number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rows(value: Value) -> Vec<RegisterDescriptor> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn holding_register_with_output_row_is_flagged() {
        let tables = RegisterTables {
            aicochannels: rows(json!([
                {"val_reg": "A", "member": "1", "mbi": 1, "mba": 2, "regadd": 3, "regtype": "h", "chantype": "mb"}
            ])),
            aochannels: rows(json!([{"mbi": 1, "mba": 2, "regadd": 3}])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        let entry = &channels["A"][&1];
        assert!(entry.output);
        assert_eq!(entry.kind, ChannelKind::Analogue);
    }

    #[test]
    fn addresses_compare_loosely() {
        let tables = RegisterTables {
            aicochannels: rows(json!([
                {"val_reg": "A", "member": 1, "mbi": "1", "mba": 2, "regadd": "300"},
                {"val_reg": "B", "member": 1, "mbi": 1, "mba": 2, "regadd": 301}
            ])),
            aochannels: rows(json!([{"mbi": 1, "mba": "2", "regadd": 300.0}])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        assert!(channels["A"][&1].output);
        assert!(!channels["B"][&1].output);
    }

    #[test]
    fn numeric_strings_compare_as_text_against_each_other() {
        let tables = RegisterTables {
            aicochannels: rows(json!([
                {"val_reg": "A", "member": 1, "mbi": "01", "mba": "2", "regadd": "3"},
                {"val_reg": "B", "member": 1, "mbi": "1", "mba": "2", "regadd": "4"}
            ])),
            aochannels: rows(json!([
                {"mbi": "1", "mba": "2.0", "regadd": "3"},
                {"mbi": "1", "mba": "2", "regadd": "4"}
            ])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        assert!(!channels["A"][&1].output);
        assert!(channels["B"][&1].output);
    }

    #[test]
    fn missing_fields_only_match_missing_or_null() {
        assert!(loose_eq(None, Some(&Value::Null)));
        assert!(!loose_eq(None, Some(&json!(0))));
        assert!(loose_eq(Some(&json!("")), Some(&json!(0))));
        assert!(loose_eq(Some(&json!(" 7 ")), Some(&json!(7))));
        assert!(!loose_eq(Some(&json!("x")), Some(&json!("X"))));
    }

    #[test]
    fn first_matching_input_wins() {
        let tables = RegisterTables {
            aicochannels: rows(json!([
                {"val_reg": "A", "member": 1, "mbi": 1, "mba": 1, "regadd": 10},
                {"val_reg": "A", "member": 2, "mbi": 1, "mba": 1, "regadd": 10}
            ])),
            aochannels: rows(json!([{"mbi": 1, "mba": 1, "regadd": 10}])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        assert!(channels["A"][&1].output);
        assert!(!channels["A"][&2].output);
    }

    #[test]
    fn discrete_outputs_also_match_on_bit() {
        let tables = RegisterTables {
            dichannels: rows(json!([
                {"val_reg": "D", "member": 1, "mbi": 1, "mba": 1, "regadd": 5, "bit": 0},
                {"val_reg": "D", "member": 2, "mbi": 1, "mba": 1, "regadd": 5, "bit": 1}
            ])),
            dochannels: rows(json!([{"mbi": 1, "mba": 1, "regadd": 5, "bit": 1}])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        assert!(!channels["D"][&1].output);
        assert!(channels["D"][&2].output);
        assert_eq!(channels["D"][&2].kind, ChannelKind::Discrete);
    }

    #[test]
    fn analogue_outputs_ignore_discrete_inputs() {
        let tables = RegisterTables {
            dichannels: rows(json!([{"val_reg": "D", "member": 1, "mbi": 1, "mba": 1, "regadd": 5}])),
            aochannels: rows(json!([{"mbi": 1, "mba": 1, "regadd": 5}])),
            ..RegisterTables::default()
        };
        assert!(!merge_channels(&tables)["D"][&1].output);
    }

    #[test]
    fn duplicate_key_index_keeps_first_entry() {
        let tables = RegisterTables {
            aicochannels: rows(json!([{"val_reg": "X", "member": 1, "mbi": 1, "mba": 1, "regadd": 1}])),
            dichannels: rows(json!([{"val_reg": "X", "member": 1, "mbi": 2, "mba": 2, "regadd": 2}])),
            dochannels: rows(json!([{"mbi": 2, "mba": 2, "regadd": 2}])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        assert_eq!(channels["X"].len(), 1);
        assert_eq!(channels["X"][&1].kind, ChannelKind::Analogue);
        assert!(!channels["X"][&1].output);
    }

    #[test]
    fn rows_without_valid_member_are_skipped() {
        let tables = RegisterTables {
            aicochannels: rows(json!([
                {"val_reg": "A", "member": "abc"},
                {"val_reg": "A", "member": 2}
            ])),
            ..RegisterTables::default()
        };
        let channels = merge_channels(&tables);
        assert_eq!(channels["A"].keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn merge_is_idempotent() {
        let tables = RegisterTables {
            aicochannels: rows(json!([
                {"val_reg": "A", "member": 1, "mbi": 1, "mba": 2, "regadd": 3},
                {"val_reg": "B", "member": 1, "mbi": 1, "mba": 2, "regadd": 4}
            ])),
            aochannels: rows(json!([{"mbi": 1, "mba": 2, "regadd": 4}])),
            ..RegisterTables::default()
        };
        assert_eq!(merge_channels(&tables), merge_channels(&tables));
    }
}
