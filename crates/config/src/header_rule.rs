//! Header transformation rules applied to every outbound request for a
//! provider or a specific model, mirroring the forward/insert/remove
//! vocabulary of the gateway config this crate was trimmed from.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeaderRule {
    Insert { name: String, value: String },
    Remove { name: String },
    Forward { name: String, rename: Option<String> },
}

/// Applies each rule in order against `headers`, using `source` to resolve
/// `Forward` rules (the incoming caller request, when one exists).
pub fn apply(rules: &[HeaderRule], headers: &mut reqwest::header::HeaderMap, source: Option<&reqwest::header::HeaderMap>) {
    for rule in rules {
        match rule {
            HeaderRule::Insert { name, value } => {
                if let (Ok(name), Ok(value)) = (
                    reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                    reqwest::header::HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
            HeaderRule::Remove { name } => {
                if let Ok(name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                    headers.remove(name);
                }
            }
            HeaderRule::Forward { name, rename } => {
                let Some(source) = source else { continue };
                let Ok(source_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) else {
                    continue;
                };
                if let Some(value) = source.get(&source_name) {
                    let target = rename.as_deref().unwrap_or(name);
                    if let Ok(target_name) = reqwest::header::HeaderName::from_bytes(target.as_bytes()) {
                        headers.insert(target_name, value.clone());
                    }
                }
            }
        }
    }
}
