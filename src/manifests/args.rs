// src/manifests/args.rs
//
// Turns a component's default argument map plus user overrides into the
// final command line. Overrides always win; the result is sorted by flag
// name so repeated renders are byte-for-byte identical.

use crate::api::defaults::{DEFAULT_AUTHORIZATION_MODES, KNOWN_AUTHORIZATION_MODES};
use crate::types::Warning;
use std::collections::BTreeMap;

pub fn build_argument_list(
    defaults: BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut merged = defaults;
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
        .into_iter()
        .map(|(key, value)| format!("--{}={}", key, value))
        .collect()
}

/// The authorization-mode flag gets special handling: unknown modes are
/// dropped rather than handed to an apiserver that would refuse to start,
/// and an override that survives validation replaces the default list
/// entirely instead of merging with it.
pub fn compose_authorization_modes(
    requested: Option<&str>,
    warnings: &mut Vec<Warning>,
) -> String {
    let recommended = DEFAULT_AUTHORIZATION_MODES.join(",");
    let requested = match requested {
        Some(modes) if !modes.is_empty() => modes,
        _ => return recommended,
    };

    let mut valid = Vec::new();
    for mode in requested.split(',') {
        let mode = mode.trim();
        if mode.is_empty() {
            continue;
        }
        if KNOWN_AUTHORIZATION_MODES.contains(&mode) {
            valid.push(mode);
        } else {
            warnings.push(Warning::new(
                "AuthorizationMode",
                format!("ignoring unknown authorization mode {:?}", mode),
            ));
        }
    }

    if valid.is_empty() {
        return recommended;
    }
    let composed = valid.join(",");
    if composed != recommended {
        warnings.push(Warning::new(
            "AuthorizationMode",
            format!(
                "authorization modes {:?} differ from the recommended {:?}",
                composed, recommended
            ),
        ));
    }
    composed
}
