use crate::schema::{events, passwords, staff};
use chrono::{Local, NaiveDateTime};
use diesel::backend::{self, Backend};
use diesel::deserialize::{self, FromSql, FromSqlRow, Queryable};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::{Integer, Text};
use diesel::sqlite::Sqlite;
use pbkdf2::password_hash::PasswordHash as PBKDF2Hash;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;
use std::{error, fmt};

#[derive(Debug, Clone)]
pub enum ModelError {
    EmptyName,
    ParsePIN(String),
    ParseCardid(String),
}

impl error::Error for ModelError {}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let description = match self {
            ModelError::ParsePIN(pin) => {
                format!("PIN muss aus 4 Zeichen (A-Z, a-z, 0-9) bestehen: \"{}\"", pin)
            }
            ModelError::ParseCardid(cardid) => {
                format!(
                    "Kartennummer muss aus 6 Zeichen (A-Z, a-z, 0-9) bestehen: \"{}\"",
                    cardid
                )
            }
            ModelError::EmptyName => String::from("Name darf nicht leer sein"),
        };
        f.write_str(&description)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum WorkStatus {
    Away,
    Working,
}

impl WorkStatus {
    pub fn toggle(&self) -> Self {
        match self {
            WorkStatus::Away => WorkStatus::Working,
            WorkStatus::Working => WorkStatus::Away,
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            WorkStatus::Away => "Pause",
            WorkStatus::Working => "Arbeit",
        };

        fmt::Display::fmt(str, f)
    }
}

/// A work event as it is serialized into the `event_json` column.
#[derive(Debug, PartialEq, Eq, Clone, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
pub enum WorkEvent {
    StatusChange(i32, String, WorkStatus),
    /// Barrier at 6am that signs off everyone who forgot to. Pre-generated by
    /// the `add_day_boundaries` tool.
    DayBoundary,
    Info(String),
}

impl fmt::Display for WorkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            WorkEvent::StatusChange(_, name, status) => {
                format!("Status von {} wurde auf \"{}\" gesetzt", name, status)
            }
            WorkEvent::DayBoundary => String::from("Tagesgrenze um 6 Uhr morgens"),
            WorkEvent::Info(msg) => format!("Info: {}", msg),
        };

        fmt::Display::fmt(&str, f)
    }
}

/// A stored work event. Rows in `events` are never updated or deleted.
#[derive(Debug, Clone, Queryable, PartialEq, Eq)]
pub struct WorkEventT {
    id: i32,
    pub created_at: NaiveDateTime,
    pub event: WorkEvent,
}

impl WorkEventT {
    pub fn id(&self) -> i32 {
        self.id
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = events)]
pub struct NewWorkEventT {
    created_at: NaiveDateTime,
    #[diesel(column_name = event_json)]
    pub event: WorkEvent,
}

impl NewWorkEventT {
    pub fn new(created_at: NaiveDateTime, event: WorkEvent) -> Self {
        NewWorkEventT { created_at, event }
    }

    pub fn now(event: WorkEvent) -> Self {
        NewWorkEventT {
            created_at: Local::now().naive_local(),
            event,
        }
    }
}

pub struct PIN;

impl FromStr for PIN {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^[A-Za-z0-9]{4}$").unwrap();
        if re.is_match(s) {
            Ok(PIN)
        } else {
            Err(ModelError::ParsePIN(s.to_owned()))
        }
    }
}

pub struct Cardid;

impl FromStr for Cardid {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^[A-Za-z0-9]{6}$").unwrap();
        if re.is_match(s) {
            Ok(Cardid)
        } else {
            Err(ModelError::ParseCardid(s.to_owned()))
        }
    }
}

/// The row image of a staff member, used for loading and updating.
/// pin and cardid are NULL for soft-deleted members, whose credentials are
/// released for reuse.
#[derive(Debug, Clone, Queryable, AsChangeset, Identifiable)]
#[diesel(table_name = staff)]
#[diesel(treat_none_as_null = true)]
pub struct DBStaffMember {
    id: i32,
    name: String,
    pin: Option<String>,
    cardid: Option<String>,
    is_visible: bool,
    is_active: bool,
}

impl DBStaffMember {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &String {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn with_status(self, status: WorkStatus) -> StaffMember {
        StaffMember {
            id: self.id,
            name: self.name,
            pin: self.pin,
            cardid: self.cardid,
            is_visible: self.is_visible,
            is_active: self.is_active,
            status,
        }
    }
}

/// The actual staff member that is used in the program.
/// status is computed from the work events, it is not stored in the DB.
#[derive(Debug, Clone)]
pub struct StaffMember {
    id: i32,
    pub name: String,
    pub pin: Option<String>,
    pub cardid: Option<String>,
    pub is_visible: bool,
    pub is_active: bool,
    pub status: WorkStatus,
}

// AsChangeset cannot be implemented for StaffMember directly since status is
// not a column. Updates go through the row image instead.
impl<'a> From<Cow<'a, StaffMember>> for DBStaffMember {
    fn from(staff_member: Cow<StaffMember>) -> Self {
        let staff_member = staff_member.into_owned();

        Self {
            id: staff_member.id,
            name: staff_member.name,
            pin: staff_member.pin,
            cardid: staff_member.cardid,
            is_visible: staff_member.is_visible,
            is_active: staff_member.is_active,
        }
    }
}

impl StaffMember {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// INVARIANT: pins and cardids are disjoint, so a single identifier
    /// cannot match two different members.
    pub fn matches_credential(&self, ident: &str) -> bool {
        self.pin.as_deref() == Some(ident) || self.cardid.as_deref() == Some(ident)
    }

    pub fn get_by_pin_or_card_id<'a>(staff: &'a [Self], ident: &str) -> Option<&'a Self> {
        staff
            .iter()
            .find(|staff_member| staff_member.matches_credential(ident))
    }

    pub fn get_by_id_mut<'a>(staff: &'a mut [Self], id: i32) -> Option<&'a mut Self> {
        staff.iter_mut().find(|staff_member| staff_member.id == id)
    }

    pub fn get_by_id<'a>(staff: &'a [Self], id: i32) -> Option<&'a Self> {
        staff.iter().find(|staff_member| staff_member.id == id)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = staff)]
pub struct NewStaffMember {
    pub name: String,
    pub pin: String,
    pub cardid: String,
}

impl NewStaffMember {
    pub fn validate(name: &str, pin: &str, cardid: &str) -> Result<(), ModelError> {
        if name.is_empty() {
            return Err(ModelError::EmptyName);
        }
        let _ = pin.parse::<PIN>()?;
        let _ = cardid.parse::<Cardid>()?;

        Ok(())
    }

    pub fn new(name: String, pin: String, cardid: String) -> Result<Self, ModelError> {
        Self::validate(&name, &pin, &cardid)?;

        Ok(Self { name, pin, cardid })
    }
}

/// A pbkdf2 password hash string in PHC format.
#[derive(Debug, Insertable)]
#[diesel(table_name = passwords)]
pub struct PasswordHash {
    phc: String,
}

impl PasswordHash {
    pub fn new(phc: String) -> Self {
        let parsed_hash = PBKDF2Hash::new(&phc).expect(&format!("Error parsing hash {}", phc));
        match (parsed_hash.salt, parsed_hash.hash) {
            (None, _) | (_, None) => panic!("hash or salt missing {}", phc),
            _ => Self { phc },
        }
    }

    pub fn hash(&self) -> PBKDF2Hash {
        PBKDF2Hash::new(&self.phc).expect(&format!("Error parsing hash {}", self.phc))
    }
}

// PasswordHash is validated on load, so Queryable is written by hand.
// (https://docs.diesel.rs/diesel/deserialize/trait.Queryable.html)
impl<DB> Queryable<passwords::SqlType, DB> for PasswordHash
where
    DB: Backend,
    i32: FromSql<Integer, DB>,
    String: FromSql<Text, DB>,
{
    type Row = (i32, String);

    fn build(row: Self::Row) -> deserialize::Result<Self> {
        Ok(PasswordHash::new(row.1))
    }
}

impl ToSql<Text, Sqlite> for WorkEvent
where
    String: ToSql<Text, Sqlite>,
{
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        let value = serde_json::to_string(self)?;
        out.set_value(value);
        Ok(IsNull::No)
    }
}

impl<DB> FromSql<Text, DB> for WorkEvent
where
    DB: Backend,
    String: FromSql<Text, DB>,
{
    fn from_sql(bytes: backend::RawValue<'_, DB>) -> deserialize::Result<Self> {
        let value = String::from_sql(bytes)?;
        Ok(serde_json::from_str(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_new_staff() {
        assert!(NewStaffMember::validate("Alice", "1234", "ABC123").is_ok());
        assert!(matches!(
            NewStaffMember::validate("", "1234", "ABC123"),
            Err(ModelError::EmptyName)
        ));
        assert!(matches!(
            NewStaffMember::validate("Alice", "123", "ABC123"),
            Err(ModelError::ParsePIN(_))
        ));
        assert!(matches!(
            NewStaffMember::validate("Alice", "12345", "ABC123"),
            Err(ModelError::ParsePIN(_))
        ));
        assert!(matches!(
            NewStaffMember::validate("Alice", "1234", "ABC1234"),
            Err(ModelError::ParseCardid(_))
        ));
        assert!(matches!(
            NewStaffMember::validate("Alice", "1234", "AB-123"),
            Err(ModelError::ParseCardid(_))
        ));
    }

    #[test]
    fn event_payload_json_roundtrip() {
        let events = vec![
            WorkEvent::StatusChange(17, String::from("Alice"), WorkStatus::Working),
            WorkEvent::DayBoundary,
            WorkEvent::Info(String::from("Kasse gezählt")),
        ];

        for event in events {
            let encoded = serde_json::to_string(&event).unwrap();
            let decoded: WorkEvent = serde_json::from_str(&encoded).unwrap();
            assert_eq!(event, decoded);
        }
    }
}
