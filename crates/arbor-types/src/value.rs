use std::cmp::Ordering;
use std::fmt;
use std::num::FpCategory;

use arbor_error::{ArborError, Result};

use crate::encoding::{ByteReader, ByteWriter};

/// Atomic type a content-and-structure index may restrict its keys to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum AtomicType {
    /// Lexically ordered text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// IEEE 754 double.
    Double,
    /// Integer or double, whichever the value parses as.
    Numeric,
    /// `false < true`.
    Boolean,
}

impl AtomicType {
    pub const ALL: [Self; 5] = [
        Self::String,
        Self::Integer,
        Self::Double,
        Self::Numeric,
        Self::Boolean,
    ];

    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::String => 1,
            Self::Integer => 2,
            Self::Double => 3,
            Self::Numeric => 4,
            Self::Boolean => 5,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::String),
            2 => Some(Self::Integer),
            3 => Some(Self::Double),
            4 => Some(Self::Numeric),
            5 => Some(Self::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
        })
    }
}

/// A typed node value.
///
/// Values have a total order usable as an index key: booleans sort before
/// numbers, numbers before strings. Integers and doubles compare
/// numerically against each other, so `Int(42) == Dbl(42.0)`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum AtomicValue {
    Bool(bool),
    Int(i64),
    Dbl(f64),
    Str(String),
}

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DBL: u8 = 3;
const TAG_STR: u8 = 4;

impl AtomicValue {
    /// The natural type of this value.
    #[must_use]
    pub const fn atomic_type(&self) -> AtomicType {
        match self {
            Self::Bool(_) => AtomicType::Boolean,
            Self::Int(_) => AtomicType::Integer,
            Self::Dbl(_) => AtomicType::Double,
            Self::Str(_) => AtomicType::String,
        }
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Dbl(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to `ty`, or `None` when the value has no representation in it.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn cast(&self, ty: AtomicType) -> Option<Self> {
        match ty {
            AtomicType::String => Some(Self::Str(self.to_string())),
            AtomicType::Boolean => match self {
                Self::Bool(b) => Some(Self::Bool(*b)),
                Self::Str(s) => match s.trim() {
                    "true" | "1" => Some(Self::Bool(true)),
                    "false" | "0" => Some(Self::Bool(false)),
                    _ => None,
                },
                Self::Int(_) | Self::Dbl(_) => None,
            },
            AtomicType::Integer => match self {
                Self::Int(i) => Some(Self::Int(*i)),
                Self::Dbl(d) if d.fract() == 0.0 && d.is_finite() => {
                    let i = *d as i64;
                    ((i as f64) == *d).then_some(Self::Int(i))
                }
                Self::Str(s) => s.trim().parse::<i64>().ok().map(Self::Int),
                Self::Dbl(_) | Self::Bool(_) => None,
            },
            AtomicType::Double => match self {
                Self::Int(i) => Some(Self::Dbl(*i as f64)),
                Self::Dbl(d) => Some(Self::Dbl(*d)),
                Self::Str(s) => s.trim().parse::<f64>().ok().map(Self::Dbl),
                Self::Bool(_) => None,
            },
            AtomicType::Numeric => match self {
                Self::Int(_) | Self::Dbl(_) => Some(self.clone()),
                Self::Str(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .map(Self::Int)
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().map(Self::Dbl))
                }
                Self::Bool(_) => None,
            },
        }
    }

    const fn sort_class(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Dbl(_) => 1,
            Self::Str(_) => 2,
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        match self {
            Self::Bool(b) => {
                w.put_u8(TAG_BOOL);
                w.put_bool(*b);
            }
            Self::Int(i) => {
                w.put_u8(TAG_INT);
                w.put_i64(*i);
            }
            Self::Dbl(d) => {
                w.put_u8(TAG_DBL);
                w.put_f64(*d);
            }
            Self::Str(s) => {
                w.put_u8(TAG_STR);
                w.put_str(s);
            }
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        match r.get_u8()? {
            TAG_BOOL => Ok(Self::Bool(r.get_bool()?)),
            TAG_INT => Ok(Self::Int(r.get_i64()?)),
            TAG_DBL => Ok(Self::Dbl(r.get_f64()?)),
            TAG_STR => Ok(Self::Str(r.get_string()?)),
            other => Err(ArborError::corrupt(format!("unknown value tag {other}"))),
        }
    }
}

/// `-0.0` and `0.0` are one key.
fn unsigned_zero(d: f64) -> f64 {
    if d.classify() == FpCategory::Zero { 0.0 } else { d }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn int_dbl_cmp(i: i64, d: f64) -> Ordering {
    let d = unsigned_zero(d);
    if d.is_nan() {
        return if d.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if d < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }
    if d >= 9_223_372_036_854_775_808.0 {
        return Ordering::Less;
    }
    match i.cmp(&(d as i64)) {
        Ordering::Equal => (i as f64).total_cmp(&d),
        other => other,
    }
}

impl Ord for AtomicValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let (ca, cb) = (self.sort_class(), other.sort_class());
        if ca != cb {
            return ca.cmp(&cb);
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Dbl(a), Self::Dbl(b)) => unsigned_zero(*a).total_cmp(&unsigned_zero(*b)),
            (Self::Int(a), Self::Dbl(b)) => int_dbl_cmp(*a, *b),
            (Self::Dbl(a), Self::Int(b)) => int_dbl_cmp(*b, *a).reverse(),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for AtomicValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AtomicValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AtomicValue {}

impl fmt::Display for AtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Dbl(d) => write!(f, "{d}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AtomicValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AtomicValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for AtomicValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for AtomicValue {
    fn from(d: f64) -> Self {
        Self::Dbl(d)
    }
}

impl From<&str> for AtomicValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for AtomicValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cross_numeric_comparison() {
        assert_eq!(AtomicValue::Int(42), AtomicValue::Dbl(42.0));
        assert!(AtomicValue::Int(42) < AtomicValue::Dbl(42.5));
        assert!(AtomicValue::Dbl(-1.5) < AtomicValue::Int(-1));
        assert!(AtomicValue::Int(i64::MAX) < AtomicValue::Dbl(1e30));
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(AtomicValue::Int(0), AtomicValue::Dbl(-0.0));
        assert_eq!(AtomicValue::Dbl(-0.0), AtomicValue::Int(0));
        assert_eq!(AtomicValue::Dbl(0.0), AtomicValue::Dbl(-0.0));
        assert!(AtomicValue::Dbl(-0.0) > AtomicValue::Dbl(-f64::MIN_POSITIVE));
        assert!(AtomicValue::Int(-1) < AtomicValue::Dbl(-0.0));
        assert_eq!(
            AtomicValue::from("-0").cast(AtomicType::Double),
            Some(AtomicValue::Int(0))
        );
    }

    #[test]
    fn class_order_bool_numeric_string() {
        assert!(AtomicValue::Bool(true) < AtomicValue::Int(i64::MIN));
        assert!(AtomicValue::Int(i64::MAX) < AtomicValue::Str(String::new()));
        assert!(AtomicValue::Bool(false) < AtomicValue::Bool(true));
    }

    #[test]
    fn cast_text_to_numeric() {
        let v = AtomicValue::from(" 42 ");
        assert_eq!(v.cast(AtomicType::Integer), Some(AtomicValue::Int(42)));
        assert_eq!(v.cast(AtomicType::Numeric), Some(AtomicValue::Int(42)));
        assert_eq!(
            AtomicValue::from("4.5").cast(AtomicType::Numeric),
            Some(AtomicValue::Dbl(4.5))
        );
        assert_eq!(AtomicValue::from("abc").cast(AtomicType::Integer), None);
        assert_eq!(AtomicValue::Dbl(2.5).cast(AtomicType::Integer), None);
        assert_eq!(
            AtomicValue::Dbl(3.0).cast(AtomicType::Integer),
            Some(AtomicValue::Int(3))
        );
    }

    #[test]
    fn cast_to_boolean_and_string() {
        assert_eq!(
            AtomicValue::from("true").cast(AtomicType::Boolean),
            Some(AtomicValue::Bool(true))
        );
        assert_eq!(AtomicValue::Int(1).cast(AtomicType::Boolean), None);
        assert_eq!(
            AtomicValue::Int(7).cast(AtomicType::String),
            Some(AtomicValue::from("7"))
        );
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let mut r = ByteReader::new(&[9]);
        assert!(AtomicValue::decode(&mut r).is_err());
    }

    fn arb_value() -> impl Strategy<Value = AtomicValue> {
        prop_oneof![
            any::<bool>().prop_map(AtomicValue::Bool),
            any::<i64>().prop_map(AtomicValue::Int),
            any::<f64>().prop_map(AtomicValue::Dbl),
            ".{0,16}".prop_map(AtomicValue::Str),
        ]
    }

    proptest! {
        #[test]
        fn prop_order_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn prop_codec_preserves_value(v in arb_value()) {
            let mut w = ByteWriter::new();
            v.encode(&mut w);
            let bytes = w.into_vec();
            let mut r = ByteReader::new(&bytes);
            let back = AtomicValue::decode(&mut r)?;
            prop_assert_eq!(back.atomic_type(), v.atomic_type());
            prop_assert_eq!(back.cmp(&v), Ordering::Equal);
        }
    }
}
