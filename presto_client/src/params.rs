//! Rendering of user-supplied parameters into Presto literal syntax.
//!
//! Serialized literals are folded into an `EXECUTE … USING …` statement, so
//! every value must render to exact SQL text. Kinds that cannot round-trip
//! losslessly through a literal (native floats, raw bytes, durations, JSON,
//! maps) are refused.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::progress::ProgressObserver;

/// An exact decimal literal carried as text, e.g. `Numeric("1e10")`.
///
/// This is the supported way to bind fractional numbers: the text is emitted
/// verbatim, after a sanity check that it parses as a float at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric(pub String);

impl Numeric {
    pub fn new(text: impl Into<String>) -> Self {
        Numeric(text.into())
    }
}

/// One bound parameter value.
pub enum Param {
    Null,
    Bool(bool),
    /// Signed integers of any width and small unsigned integers, via `From`.
    Int(i64),
    Numeric(Numeric),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    /// A wall-clock time in an explicit UTC offset.
    TimeTz(NaiveTime, FixedOffset),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Array(Vec<Param>),

    // Kinds the serializer refuses; kept as variants so callers get a typed
    // refusal instead of silent precision loss.
    Float32(f32),
    Float64(f64),
    Byte(u8),
    Bytes(Vec<u8>),
    Duration(Duration),
    Json(serde_json::Value),
    Map(Vec<(String, Param)>),

    // Magic values recognized by the statement engine, never serialized.
    Observer(Arc<dyn ProgressObserver>),
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Null => write!(f, "Null"),
            Param::Bool(v) => write!(f, "Bool({v})"),
            Param::Int(v) => write!(f, "Int({v})"),
            Param::Numeric(v) => write!(f, "Numeric({:?})", v.0),
            Param::String(v) => write!(f, "String({v:?})"),
            Param::Date(v) => write!(f, "Date({v})"),
            Param::Time(v) => write!(f, "Time({v})"),
            Param::TimeTz(v, tz) => write!(f, "TimeTz({v} {tz})"),
            Param::Timestamp(v) => write!(f, "Timestamp({v})"),
            Param::TimestampTz(v) => write!(f, "TimestampTz({v})"),
            Param::Array(v) => f.debug_tuple("Array").field(v).finish(),
            Param::Float32(v) => write!(f, "Float32({v})"),
            Param::Float64(v) => write!(f, "Float64({v})"),
            Param::Byte(v) => write!(f, "Byte({v})"),
            Param::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Param::Duration(v) => write!(f, "Duration({v:?})"),
            Param::Json(v) => write!(f, "Json({v})"),
            Param::Map(v) => write!(f, "Map({} entries)", v.len()),
            Param::Observer(_) => write!(f, "Observer"),
        }
    }
}

macro_rules! int_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Param {
            fn from(v: $t) -> Param {
                Param::Int(v as i64)
            }
        })*
    };
}
int_from!(i8, i16, i32, i64, u16, u32);

impl From<bool> for Param {
    fn from(v: bool) -> Param {
        Param::Bool(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Param {
        Param::String(v.to_owned())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Param {
        Param::String(v)
    }
}

impl From<u8> for Param {
    fn from(v: u8) -> Param {
        Param::Byte(v)
    }
}

impl From<f32> for Param {
    fn from(v: f32) -> Param {
        Param::Float32(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Param {
        Param::Float64(v)
    }
}

impl From<Numeric> for Param {
    fn from(v: Numeric) -> Param {
        Param::Numeric(v)
    }
}

impl From<NaiveDate> for Param {
    fn from(v: NaiveDate) -> Param {
        Param::Date(v)
    }
}

impl From<NaiveTime> for Param {
    fn from(v: NaiveTime) -> Param {
        Param::Time(v)
    }
}

impl From<NaiveDateTime> for Param {
    fn from(v: NaiveDateTime) -> Param {
        Param::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for Param {
    fn from(v: DateTime<FixedOffset>) -> Param {
        Param::TimestampTz(v)
    }
}

impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(v: Vec<T>) -> Param {
        Param::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Render one parameter as a Presto literal fragment.
pub fn serialize(param: &Param) -> Result<String> {
    match param {
        Param::Null => Ok("NULL".to_owned()),
        Param::Bool(v) => Ok(if *v { "true" } else { "false" }.to_owned()),
        Param::Int(v) => Ok(v.to_string()),
        Param::Numeric(Numeric(text)) => {
            text.parse::<f64>()
                .map_err(|_| Error::Config(format!("numeric literal does not parse: {text:?}")))?;
            Ok(text.clone())
        }
        Param::String(v) => Ok(format!("'{}'", v.replace('\'', "''"))),
        Param::Date(v) => Ok(format!("DATE '{}'", v.format("%Y-%m-%d"))),
        Param::Time(v) => Ok(format!("TIME '{}'", v.format("%H:%M:%S%.9f"))),
        Param::TimeTz(v, tz) => Ok(format!("TIME '{} {}'", v.format("%H:%M:%S%.9f"), tz)),
        Param::Timestamp(v) => Ok(format!(
            "TIMESTAMP '{}'",
            v.format("%Y-%m-%d %H:%M:%S%.9f")
        )),
        Param::TimestampTz(v) => Ok(format!(
            "TIMESTAMP '{} {}'",
            v.format("%Y-%m-%d %H:%M:%S%.9f"),
            v.offset()
        )),
        Param::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(serialize(item)?);
            }
            Ok(format!("ARRAY[{}]", parts.join(", ")))
        }
        Param::Float32(_) => Err(Error::UnsupportedParameter("f32")),
        Param::Float64(_) => Err(Error::UnsupportedParameter("f64")),
        Param::Byte(_) => Err(Error::UnsupportedParameter("byte")),
        Param::Bytes(_) => Err(Error::UnsupportedParameter("byte array")),
        Param::Duration(_) => Err(Error::UnsupportedParameter("duration")),
        Param::Json(_) => Err(Error::UnsupportedParameter("json")),
        Param::Map(_) => Err(Error::UnsupportedParameter("map")),
        Param::Observer(_) => Err(Error::UnsupportedParameter("progress observer")),
    }
}
