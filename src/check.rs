//! Validation of incoming data.
//!
//! Types implement [`Check`] either by hand or via `#[derive(Check)]`:
//!
//! ```rust,ignore
//! #[derive(Deserialize, kit::Check)]
//! struct CreateOrder {
//!     #[check(required, id)]
//!     customer: String,
//!     #[check(length(min = 1, max = 200))]
//!     note: String,
//! }
//! ```
//!
//! Every failure is an [`ApiError`](crate::web::error::ApiError) with status
//! 400, so handlers can simply propagate it.

use crate::status_bail;
use crate::timestamp::Timestamp;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use warp::http::StatusCode;

pub type CheckResult = anyhow::Result<()>;

/// A value which can validate itself.
pub trait Check {
    fn check(&self) -> CheckResult;
}

impl<T: Check + ?Sized> Check for Box<T> {
    fn check(&self) -> CheckResult {
        (**self).check()
    }
}

impl<T: Check> Check for Option<T> {
    fn check(&self) -> CheckResult {
        match self {
            Some(value) => value.check(),
            None => Ok(()),
        }
    }
}

impl<T: Check> Check for Vec<T> {
    fn check(&self) -> CheckResult {
        self.iter().try_for_each(Check::check)
    }
}

/// Values which can be "not set". See [`required`].
pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for str {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for bool {
    fn is_blank(&self) -> bool {
        !*self
    }
}

impl<T> Blank for Option<T> {
    fn is_blank(&self) -> bool {
        self.is_none()
    }
}

impl<T> Blank for [T] {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Blank for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V, S> Blank for HashMap<K, V, S> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> Blank for BTreeMap<K, V> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T, S> Blank for HashSet<T, S> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for Timestamp {
    fn is_blank(&self) -> bool {
        self.is_null()
    }
}

impl<T: Blank + ?Sized> Blank for &T {
    fn is_blank(&self) -> bool {
        (**self).is_blank()
    }
}

impl<T: Blank + ?Sized> Blank for Box<T> {
    fn is_blank(&self) -> bool {
        (**self).is_blank()
    }
}

macro_rules! blank_if_zero {
    ($($ty:ty),*) => {
        $(impl Blank for $ty {
            fn is_blank(&self) -> bool {
                *self == (0 as $ty)
            }
        })*
    };
}

blank_if_zero!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Fails unless the value is set.
pub fn required<T: Blank + ?Sized>(field_name: &str, value: &T) -> CheckResult {
    if value.is_blank() {
        status_bail!(StatusCode::BAD_REQUEST, "'{}' is required", field_name);
    }

    Ok(())
}

pub fn is_valid_str(data: &str, min_length: usize, max_length: usize) -> bool {
    let len = data.chars().count();
    len >= min_length && len <= max_length
}

pub fn validate_str<S: AsRef<str>>(
    field_name: &str,
    data: S,
    min_length: usize,
    max_length: usize,
) -> anyhow::Result<S> {
    if !is_valid_str(data.as_ref(), min_length, max_length) {
        status_bail!(
            StatusCode::BAD_REQUEST,
            "'{}' must be between {} and {} characters long",
            field_name,
            min_length,
            max_length
        );
    }

    Ok(data)
}

/// Allowed: a-z, A-Z, 0-9, `_`, `-`, `:` and `/`, at most 64 characters.
static VALID_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-:/]{1,64}$").expect("Invalid regex"));

pub fn is_valid_id(id: &str) -> bool {
    VALID_ID_REGEX.is_match(id)
}

pub fn validate_id<S: AsRef<str>>(field_name: &str, id: S) -> anyhow::Result<S> {
    if !is_valid_id(id.as_ref()) {
        status_bail!(
            StatusCode::BAD_REQUEST,
            "'{}' must only contain letters, digits, '_', '-', ':', or '/'",
            field_name
        );
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::error::ApiError;

    fn status_of(result: CheckResult) -> StatusCode {
        let err = result.unwrap_err();
        ApiError::find(&err).map(|api_error| api_error.status).unwrap()
    }

    #[test]
    fn required_rejects_blank_values() {
        assert!(required("name", "").is_err());
        assert!(required("name", &String::new()).is_err());
        assert!(required("count", &0_u32).is_err());
        assert!(required("tags", &Vec::<String>::new()).is_err());
        assert!(required("parent", &None::<String>).is_err());
        assert!(required("created", &Timestamp::null()).is_err());

        assert!(required("name", "Ada").is_ok());
        assert!(required("count", &3_i64).is_ok());
        assert!(required("parent", &Some(String::new())).is_ok());
        assert!(required("created", &Timestamp::now()).is_ok());
    }

    #[test]
    fn required_fails_with_bad_request() {
        let result = required("name", "");

        assert_eq!(result.as_ref().unwrap_err().to_string(), "'name' is required");
        assert_eq!(status_of(result), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validate_str_checks_length() {
        assert_eq!(validate_str("code", "abc", 1, 3).unwrap(), "abc");
        assert!(validate_str("code", "", 1, 3).is_err());
        assert!(validate_str("code", "abcd", 1, 3).is_err());
        assert!(validate_str("code", "äöü", 3, 3).is_ok());
    }

    #[test]
    fn validate_id_checks_characters() {
        assert!(validate_id("id", "tenant:42/order_7-a").is_ok());
        assert!(validate_id("id", "").is_err());
        assert!(validate_id("id", "white space").is_err());
        assert!(validate_id("id", "a".repeat(65)).is_err());
        assert_eq!(status_of(validate_id("id", "#").map(|_| ())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn containers_delegate_checks() {
        struct Positive(i32);

        impl Check for Positive {
            fn check(&self) -> CheckResult {
                if self.0 <= 0 {
                    status_bail!(StatusCode::BAD_REQUEST, "must be positive");
                }
                Ok(())
            }
        }

        assert!(vec![Positive(1), Positive(2)].check().is_ok());
        assert!(vec![Positive(1), Positive(-2)].check().is_err());
        assert!(None::<Positive>.check().is_ok());
    }

    #[derive(crate::Check)]
    struct Address {
        #[check(required)]
        city: String,
    }

    #[derive(crate::Check)]
    struct CreateOrder {
        #[check(required, id, rename = "customerID")]
        customer: String,
        #[check(length(max = 5))]
        note: String,
        #[check(nested)]
        address: Address,
        #[allow(dead_code)]
        unchecked: u32,
    }

    fn order(customer: &str, note: &str, city: &str) -> CreateOrder {
        CreateOrder {
            customer: customer.to_string(),
            note: note.to_string(),
            address: Address {
                city: city.to_string(),
            },
            unchecked: 0,
        }
    }

    #[test]
    fn derived_checks_run_field_rules() {
        assert!(order("c-1", "", "Berlin").check().is_ok());

        let err = order("", "", "Berlin").check().unwrap_err();
        assert_eq!(err.to_string(), "'customerID' is required");

        let err = order("c 1", "", "Berlin").check().unwrap_err();
        assert!(err.to_string().starts_with("'customerID' must only contain"));

        let err = order("c-1", "too long", "Berlin").check().unwrap_err();
        assert_eq!(err.to_string(), "'note' must be between 0 and 5 characters long");

        let err = order("c-1", "", "").check().unwrap_err();
        assert_eq!(err.to_string(), "'city' is required");
    }
}
