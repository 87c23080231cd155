//! Address obfuscation.
//!
//! When randomisation is on, the page only ever sees a per-process
//! placeholder address while the endpoints only ever see the real
//! impersonated account. The swap is a plain case-insensitive text
//! substitution over the serialized JSON, so the hex of either address
//! is also rewritten where it appears inside unrelated data.

use crate::settings::Settings;
use alloy_primitives::Address;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AddressObfuscator {
    placeholder: String,
}

impl AddressObfuscator {
    /// Draw a fresh random placeholder.
    pub fn random() -> Self {
        let address = Address::from(rand::random::<[u8; 20]>());
        Self::with_placeholder(format!("0x{}", hex::encode(address.as_slice())))
    }

    pub fn with_placeholder(placeholder: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// The account the page is told it is connected to.
    pub fn exposed_account(&self, settings: &Settings) -> String {
        if settings.addr_randomize {
            self.placeholder.clone()
        } else {
            settings.impersonated_account.clone()
        }
    }

    /// Placeholder → real address. Applied to requests before they reach
    /// an endpoint.
    pub fn reveal(&self, settings: &Settings, payload: Value) -> Value {
        self.replace(settings, payload, &self.placeholder, &settings.impersonated_account)
    }

    /// Real address → placeholder. Applied to recorded transactions
    /// before they are handed back to the page.
    pub fn conceal(&self, settings: &Settings, payload: Value) -> Value {
        self.replace(settings, payload, &settings.impersonated_account, &self.placeholder)
    }

    /// Substitute `search` with `replace` throughout `payload`. A no-op
    /// unless randomisation is enabled.
    pub fn replace(&self, settings: &Settings, payload: Value, search: &str, replace: &str) -> Value {
        if !settings.addr_randomize {
            return payload;
        }
        let search = strip_hex_prefix(search).to_ascii_lowercase();
        let replace = strip_hex_prefix(replace).to_ascii_lowercase();

        let text = match serde_json::to_string(&payload) {
            Ok(text) => text,
            Err(_) => return payload,
        };
        match serde_json::from_str(&substitute(&text, &search, &replace)) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Address substitution produced invalid JSON; payload left as is");
                payload
            }
        }
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Replace every case-insensitive occurrence of the lowercase `search`.
fn substitute(text: &str, search: &str, replace: &str) -> String {
    if search.is_empty() {
        return text.to_string();
    }
    // ASCII lowercasing keeps byte offsets identical.
    let haystack = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in haystack.match_indices(search) {
        out.push_str(&text[last..start]);
        out.push_str(replace);
        last = start + search.len();
    }
    out.push_str(&text[last..]);
    out
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REAL: &str = "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B";
    const PLACEHOLDER: &str = "0x1111111111111111111111111111111111111111";

    fn settings(randomize: bool) -> Settings {
        Settings {
            addr_randomize: randomize,
            impersonated_account: REAL.into(),
            ..Settings::default()
        }
    }

    #[test]
    fn test_random_placeholder_is_address_shaped() {
        let ob = AddressObfuscator::random();
        assert_eq!(ob.placeholder().len(), 42);
        assert!(ob.placeholder().starts_with("0x"));
        assert!(ob.placeholder()[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_disabled_is_identity() {
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        let payload = json!({"from": PLACEHOLDER});
        assert_eq!(ob.reveal(&settings(false), payload.clone()), payload);
    }

    #[test]
    fn test_reveal_swaps_placeholder_for_real() {
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        let out = ob.reveal(&settings(true), json!({"from": PLACEHOLDER, "to": "0x22"}));
        assert_eq!(out["from"], json!(REAL.to_lowercase()));
        assert_eq!(out["to"], json!("0x22"));
    }

    #[test]
    fn test_replace_is_case_insensitive() {
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        let out = ob.replace(
            &settings(true),
            json!({"from": REAL.to_uppercase().replace("0X", "0x")}),
            REAL,
            PLACEHOLDER,
        );
        assert_eq!(out["from"], json!(PLACEHOLDER));
    }

    #[test]
    fn test_conceal_swaps_real_for_placeholder() {
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        let out = ob.conceal(&settings(true), json!({"from": REAL.to_lowercase(), "to": "0x22"}));
        assert_eq!(out["from"], json!(PLACEHOLDER));
        assert_eq!(out["to"], json!("0x22"));
        let untouched = json!({"from": REAL});
        assert_eq!(ob.conceal(&settings(false), untouched.clone()), untouched);
    }

    #[test]
    fn test_round_trip_restores_payload() {
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        let s = settings(true);
        let payload = json!([{"from": PLACEHOLDER, "nested": {"who": [PLACEHOLDER]}}, "latest"]);
        let back = ob.conceal(&s, ob.reveal(&s, payload.clone()));
        assert_eq!(back, payload);
    }

    #[test]
    fn test_rewrites_inside_calldata() {
        // Text-level substitution also hits the address embedded in calldata.
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        let data = format!("0xa9059cbb000000000000000000000000{}", &PLACEHOLDER[2..]);
        let out = ob.reveal(&settings(true), json!({"data": data}));
        assert!(out["data"]
            .as_str()
            .unwrap()
            .ends_with(&REAL[2..].to_lowercase()));
    }

    #[test]
    fn test_exposed_account() {
        let ob = AddressObfuscator::with_placeholder(PLACEHOLDER);
        assert_eq!(ob.exposed_account(&settings(true)), PLACEHOLDER);
        assert_eq!(ob.exposed_account(&settings(false)), REAL);
    }

    #[test]
    fn test_substitute_empty_search_is_noop() {
        assert_eq!(substitute("abc", "", "x"), "abc");
    }
}
