use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String identifiers with a readable prefix and a time-ordered UUID body.
macro_rules! prefixed_ids {
    ($($(#[$meta:meta])* $name:ident => $prefix:literal;)+) => {$(
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7().simple()))
            }

            /// Wrap an id minted elsewhere (a client, the model API) as is.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::from_raw(raw)
            }
        }
    )+};
}

prefixed_ids! {
    /// Groups the turns of one chat session.
    ConversationId => "conv";
    /// One user question and everything done to answer it.
    TurnId => "turn";
    ToolCallId => "toolu";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(ConversationId::new().as_str().starts_with("conv_"));
        assert!(TurnId::new().as_str().starts_with("turn_"));
        assert!(ToolCallId::new().as_str().starts_with("toolu_"));
        assert_eq!(TurnId::PREFIX, "turn");
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let ids: Vec<TurnId> = (0..50).map(|_| TurnId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn raw_ids_pass_through() {
        let id = ToolCallId::from("toolu_abc");
        assert_eq!(id.to_string(), "toolu_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""toolu_abc""#);
        let back: ToolCallId = serde_json::from_str(r#""toolu_abc""#).unwrap();
        assert_eq!(back, id);
    }
}
