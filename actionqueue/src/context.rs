// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Guards against persisting secrets as part of a task context.

use serde_json::Value;

/// Normalized field names which must never be stored in a context.
const SECRET_FIELDS: &[&str] = &[
    "keyset",
    "userkeyset",
    "devicekeyset",
    "privatekey",
    "signingkey",
    "secretkey",
    "password",
];

/// Returns the path of the first secret-shaped field in `context`.
pub(crate) fn find_secret_field(context: &Value) -> Option<String> {
    find_in(context, String::new())
}

fn find_in(value: &Value, path: String) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(name, value)| {
            let field_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            if is_secret_name(name) {
                Some(field_path)
            } else {
                find_in(value, field_path)
            }
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(idx, value)| find_in(value, format!("{path}[{idx}]"))),
        _ => None,
    }
}

fn is_secret_name(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    SECRET_FIELDS.contains(&normalized.as_str())
}
