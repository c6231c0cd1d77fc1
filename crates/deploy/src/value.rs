//! Step input/output values.
//!
//! Deployment steps exchange data through a closed set of value kinds so
//! that reference resolution can be validated up front instead of failing
//! deep inside a running plan.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value flowing between deployment steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Value {
    /// An on-chain account or contract address.
    Address(String),
    /// A content-derived hash (code hash, block hash, transaction hash).
    Hash(String),
    /// An unsigned integer (balances, weights, durations).
    Uint(#[serde(with = "uint_serde")] u128),
    /// An arbitrary string.
    Str(String),
    /// An ordered list of values.
    List(Vec<Value>),
}

impl Value {
    /// The kind name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Address(_) => "address",
            Value::Hash(_) => "hash",
            Value::Uint(_) => "uint",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    pub fn as_address(&self) -> Option<&str> {
        match self {
            Value::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&str> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Value::Uint(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Unsigned 128-bit values on the wire.
///
/// Serialized as decimal strings: TOML and most JSON consumers cap
/// integers at 64 bits, and balances routinely exceed that. Plain
/// integers are still accepted on input.
pub(crate) mod uint_serde {
    use std::fmt;

    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(n: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(n)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct UintVisitor;

        impl de::Visitor<'_> for UintVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_u128<E>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom("negative integer"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(UintVisitor)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Address(a) => write!(f, "{a}"),
            Value::Hash(h) => write!(f, "{h}"),
            Value::Uint(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_kind() {
        assert_eq!(Value::Address("5F3s".into()).as_address(), Some("5F3s"));
        assert_eq!(Value::Uint(42).as_uint(), Some(42));
        assert_eq!(Value::Uint(42).as_address(), None);
        assert_eq!(Value::Hash("0xab".into()).as_hash(), Some("0xab"));
    }

    #[test]
    fn display_renders_lists() {
        let v = Value::List(vec![Value::Uint(1), Value::Str("x".into())]);
        assert_eq!(v.to_string(), "[1, x]");
    }

    #[test]
    fn serde_round_trip() {
        let v = Value::List(vec![Value::Address("5F3s".into()), Value::Uint(7)]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn uints_serialize_as_decimal_strings() {
        let json = serde_json::to_value(Value::Uint(u128::MAX)).unwrap();
        assert_eq!(json["value"], u128::MAX.to_string());

        // Plain integers remain accepted on input.
        let back: Value = serde_json::from_str(r#"{"kind":"uint","value":86400000}"#).unwrap();
        assert_eq!(back, Value::Uint(86_400_000));
        let back: Value =
            serde_json::from_str(r#"{"kind":"uint","value":"340282366920938463463374607431768211455"}"#)
                .unwrap();
        assert_eq!(back, Value::Uint(u128::MAX));
    }
}
