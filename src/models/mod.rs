//! Oilfield reporting entities and their field rules.
//!
//! Entities are plain structs; `id` is assigned by the
//! [`registry::Registry`] on insert and ignored on input.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::schema::{max_chars, range_i64, Validate};

pub mod registry;

pub use registry::Registry;

pub type Id = u64;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .expect("valid email regex")
});

/// International format: optional `+`, 8 to 15 digits, no leading zero.
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9][0-9]{7,14}$").expect("valid phone regex"));

fn non_empty(errs: &mut ValidationErrors, path: &str, value: &str) {
    if value.trim().is_empty() {
        errs.push(path, "this field cannot be blank");
    }
}

/// Fixed-point amount with three decimal places and at most ten digits,
/// stored as thousandths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i64);

impl Quantity {
    pub const SCALE: i64 = 1_000;
    /// Exclusive bound: ten digits in total, three after the point.
    pub const LIMIT: i64 = 10_000_000_000;

    pub fn from_thousandths(v: i64) -> Self {
        Quantity(v)
    }

    pub fn thousandths(&self) -> i64 {
        self.0
    }

    pub fn fits(&self) -> bool {
        self.0.unsigned_abs() < Self::LIMIT as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal '{0}'")]
pub struct ParseQuantityError(pub String);

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseQuantityError(s.to_string());
        let t = s.trim();
        let (neg, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let (int, frac) = t.split_once('.').unwrap_or((t, ""));
        if int.is_empty() || frac.len() > 3 {
            return Err(err());
        }
        if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let int: i64 = int.parse().map_err(|_| err())?;
        let frac: i64 = format!("{:0<3}", frac).parse().map_err(|_| err())?;
        let v = int
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(err)?;
        Ok(Quantity(if neg { -v } else { v }))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:03}",
            sign,
            abs / Self::SCALE as u64,
            abs % Self::SCALE as u64
        )
    }
}

impl Serialize for Quantity {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
            Float(f64),
        }
        match Raw::deserialize(d)? {
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Int(i) => i
                .checked_mul(Quantity::SCALE)
                .map(Quantity)
                .ok_or_else(|| serde::de::Error::custom("decimal out of range")),
            Raw::Float(f) => {
                let scaled = (f * Quantity::SCALE as f64).round();
                if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
                    return Err(serde::de::Error::custom("decimal out of range"));
                }
                Ok(Quantity(scaled as i64))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OilField {
    #[serde(default)]
    pub id: Id,
    pub name: String,
    /// Share of wells equipped with ASURG gauges, percent.
    pub asurg: i64,
    /// Share of associated gas utilised, percent.
    pub gas_disposal: i64,
}

impl Validate for OilField {
    fn check(&self, errs: &mut ValidationErrors) {
        non_empty(errs, "name", &self.name);
        max_chars(errs, "name", &self.name, 255);
        range_i64(errs, "asurg", self.asurg, 0, 100);
        range_i64(errs, "gas_disposal", self.gas_disposal, 0, 100);
    }
}

impl fmt::Display for OilField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Well {
    #[serde(default)]
    pub id: Id,
    pub oilfield: Id,
    pub ident_number: String,
    pub well_type: String,
    #[serde(default)]
    pub well_status: String,
}

impl Validate for Well {
    fn check(&self, errs: &mut ValidationErrors) {
        non_empty(errs, "ident_number", &self.ident_number);
        max_chars(errs, "ident_number", &self.ident_number, 255);
        max_chars(errs, "well_type", &self.well_type, 255);
        max_chars(errs, "well_status", &self.well_status, 255);
    }
}

impl fmt::Display for Well {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ident_number)
    }
}

/// Daily production of one well, tonnes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mining {
    #[serde(default)]
    pub id: Id,
    pub well: Id,
    pub mining_date: NaiveDate,
    pub mining_value: Quantity,
}

impl Validate for Mining {
    fn check(&self, errs: &mut ValidationErrors) {
        if !self.mining_value.fits() {
            errs.push(
                "mining_value",
                "ensure that there are no more than 10 digits in total",
            );
        }
    }
}

/// URGG gas flow reading, cubic metres.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Urgg {
    #[serde(default)]
    pub id: Id,
    pub well: Id,
    pub urgg_date: NaiveDate,
    pub urgg_count: i64,
}

impl Validate for Urgg {
    fn check(&self, _errs: &mut ValidationErrors) {}
}

impl fmt::Display for Urgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} m3", self.urgg_date, self.urgg_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasDisposal {
    #[serde(default)]
    pub id: Id,
    pub well: Id,
    pub gas_disposal_date: NaiveDate,
    pub gas_disposal_count: i64,
}

impl Validate for GasDisposal {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.gas_disposal_count < 0 {
            errs.push("gas_disposal_count", "ensure this value is greater than or equal to 0");
        }
    }
}

impl fmt::Display for GasDisposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} m3", self.gas_disposal_date, self.gas_disposal_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    #[serde(default)]
    pub id: Id,
    pub incident_date: NaiveDate,
    pub incident_count: i64,
    pub incident_details: String,
}

impl Validate for Incident {
    fn check(&self, errs: &mut ValidationErrors) {
        if self.incident_count < 0 {
            errs.push("incident_count", "ensure this value is greater than or equal to 0");
        }
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, quantity {}", self.incident_date, self.incident_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(default)]
    pub id: Id,
    /// Personnel number; tasks reference employees by it.
    #[serde(default)]
    pub id_employee: Option<i64>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub middle_name: String,
    pub phone_number: String,
}

impl Employee {
    /// "Last First Middle" with empty parts skipped.
    pub fn full_name(&self) -> String {
        [&self.last_name, &self.first_name, &self.middle_name]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Validate for Employee {
    fn check(&self, errs: &mut ValidationErrors) {
        max_chars(errs, "email", &self.email, 40);
        if !EMAIL_RE.is_match(&self.email) {
            errs.push("email", "enter a valid email address");
        }
        non_empty(errs, "first_name", &self.first_name);
        max_chars(errs, "first_name", &self.first_name, 30);
        non_empty(errs, "last_name", &self.last_name);
        max_chars(errs, "last_name", &self.last_name, 30);
        max_chars(errs, "middle_name", &self.middle_name, 30);
        if !PHONE_RE.is_match(&self.phone_number) {
            errs.push("phone_number", "enter a valid phone number");
        }
    }
}

impl fmt::Display for Employee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id_employee {
            Some(n) => write!(f, "{}", n),
            None => f.write_str("None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: Id,
    pub task_date: NaiveDate,
    /// `Employee::id_employee` of the assignee; cleared when the employee
    /// is deleted.
    #[serde(default)]
    pub employee: Option<i64>,
    pub task_details: String,
}

impl Validate for Task {
    fn check(&self, errs: &mut ValidationErrors) {
        non_empty(errs, "task_details", &self.task_details);
        max_chars(errs, "task_details", &self.task_details, 255);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.task_details.chars().take(10).collect();
        write!(f, "{} - {}", self.task_date, short)
    }
}
