use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::Deserializer;
use serde::de::{self, Visitor};

/// Accepts either a native scalar or its string spelling.
///
/// Rosters converted from INI files quote everything (`port = "2601"`,
/// `sort = "true"`), so numeric and boolean keys go through this.
pub fn number_or_string<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr,
    T::Err: fmt::Display,
    D: Deserializer<'de>,
{
    struct NumberOrString<T>(PhantomData<fn() -> T>);

    impl<T> NumberOrString<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        fn parse<E: de::Error>(value: &str) -> Result<T, E> {
            value.trim().parse().map_err(E::custom)
        }
    }

    impl<'de, T> Visitor<'de> for NumberOrString<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        type Value = T;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number, a boolean, or a string holding one")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<T, E> {
            Self::parse(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<T, E> {
            Self::parse(&value.to_string())
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<T, E> {
            Self::parse(&value.to_string())
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<T, E> {
            Self::parse(&value.to_string())
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<T, E> {
            Self::parse(&value.to_string())
        }
    }

    deserializer.deserialize_any(NumberOrString(PhantomData))
}

/// [`number_or_string`] for optional keys; pair with `#[serde(default)]`.
pub fn opt_number_or_string<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: FromStr,
    T::Err: fmt::Display,
    D: Deserializer<'de>,
{
    number_or_string(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "super::number_or_string")]
        port: u16,
        #[serde(deserialize_with = "super::number_or_string")]
        sort: bool,
        #[serde(default, deserialize_with = "super::opt_number_or_string")]
        min_age: Option<u64>,
    }

    #[test]
    fn native_and_quoted_values() {
        let native: Sample =
            serde_json::from_str(r#"{"port": 2601, "sort": true, "min_age": 3600}"#).expect("native");
        let quoted: Sample =
            serde_json::from_str(r#"{"port": "2601", "sort": "true"}"#).expect("quoted");
        assert_eq!(native.port, 2601);
        assert_eq!(quoted.port, 2601);
        assert!(native.sort && quoted.sort);
        assert_eq!(native.min_age, Some(3600));
        assert_eq!(quoted.min_age, None);
    }

    #[test]
    fn garbage_is_an_error() {
        let err = serde_json::from_str::<Sample>(r#"{"port": "ssh", "sort": false}"#)
            .err()
            .expect("error");
        assert!(err.to_string().contains("invalid digit"));
        assert!(serde_json::from_str::<Sample>(r#"{"port": 70000, "sort": false}"#).is_err());
    }
}
