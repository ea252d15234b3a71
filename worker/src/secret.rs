use std::collections::BTreeMap;
use std::fmt;

const MASK: char = '*';

/// A requester-provided secret.
///
/// `Debug` and `Display` only ever show the masked form, one mask character
/// per character of the value. The clear value is reachable through
/// [`RedactedSecret::expose`] and nothing that writes artifacts calls it.
#[derive(Clone, PartialEq, Eq)]
pub struct RedactedSecret(String);

impl RedactedSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        self.0.chars().map(|_| MASK).collect()
    }
}

impl fmt::Display for RedactedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for RedactedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RedactedSecret({})", self.masked())
    }
}

/// One log line per configured slot, in slot order.
pub fn describe_secrets(slots: &BTreeMap<u32, Option<RedactedSecret>>) -> Vec<String> {
    slots
        .iter()
        .map(|(slot, secret)| match secret {
            Some(secret) => format!("Got requester secret {slot} ({secret})!"),
            None => format!("Requester secret {slot} is not set"),
        })
        .collect()
}
