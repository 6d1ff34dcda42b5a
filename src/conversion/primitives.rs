//! Primitive type implementations (bool, integers, floats).

use crate::error::{Error, Result};

use super::{FromSqlText, ToSqlText, parse_error};

// === Boolean ===

impl ToSqlText for bool {
    fn to_sql_text(&self) -> Option<String> {
        Some(if *self { "true" } else { "false" }.to_string())
    }
}

impl FromSqlText for bool {
    fn from_sql_text(text: &str) -> Result<Self> {
        match text {
            "t" | "true" | "TRUE" | "T" | "1" | "on" | "yes" => Ok(true),
            "f" | "false" | "FALSE" | "F" | "0" | "off" | "no" => Ok(false),
            _ => Err(Error::Argument(format!("invalid boolean: {text:?}"))),
        }
    }
}

// === Integer types ===

macro_rules! impl_integer {
    ($($t:ty),+) => {
        $(
            impl ToSqlText for $t {
                fn to_sql_text(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }

            impl FromSqlText for $t {
                fn from_sql_text(text: &str) -> Result<Self> {
                    text.trim()
                        .parse()
                        .map_err(|e| parse_error(stringify!($t), text, e))
                }
            }
        )+
    };
}

impl_integer!(i8, i16, i32, i64, u16, u32, u64);

// === Floating point ===
//
// The server spells the special values NaN, Infinity and -Infinity.

macro_rules! impl_float {
    ($($t:ty),+) => {
        $(
            impl ToSqlText for $t {
                fn to_sql_text(&self) -> Option<String> {
                    Some(if self.is_nan() {
                        "NaN".to_string()
                    } else if self.is_infinite() {
                        if self.is_sign_positive() { "Infinity" } else { "-Infinity" }.to_string()
                    } else {
                        self.to_string()
                    })
                }
            }

            impl FromSqlText for $t {
                fn from_sql_text(text: &str) -> Result<Self> {
                    match text {
                        "NaN" => Ok(<$t>::NAN),
                        "Infinity" => Ok(<$t>::INFINITY),
                        "-Infinity" => Ok(<$t>::NEG_INFINITY),
                        _ => text
                            .parse()
                            .map_err(|e| parse_error(stringify!($t), text, e)),
                    }
                }
            }
        )+
    };
}

impl_float!(f32, f64);
