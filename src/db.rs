use crate::models::{
    DBStaffMember, ModelError, NewStaffMember, NewWorkEventT, PasswordHash, StaffMember, WorkEvent,
    WorkEventT, WorkStatus,
};
use crate::schema;
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use pbkdf2::{password_hash::PasswordVerifier, Pbkdf2};
use std::borrow::Cow;
use std::{env, error, fmt};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

/// The staff column an input collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Name,
    Pin,
    Cardid,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            CredentialField::Name => "Name",
            CredentialField::Pin => "PIN",
            CredentialField::Cardid => "Kartennummer",
        };

        fmt::Display::fmt(str, f)
    }
}

#[derive(Debug)]
pub enum StoreError {
    /// Name, PIN and card id double as lookup keys, so a uniqueness violation
    /// is reported per field instead of as a generic database failure.
    DuplicateCredential(CredentialField),
    UnknownCredential(String),
    UnknownStaff(i32),
    InactiveStaff(String),
    Model(ModelError),
    Migration(String),
    Diesel(diesel::result::Error),
}

impl error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::DuplicateCredential(field) => {
                write!(f, "{} ist bereits vergeben", field)
            }
            StoreError::UnknownCredential(ident) => {
                write!(f, "Keine Person mit der Kennung \"{}\" gefunden", ident)
            }
            StoreError::UnknownStaff(staff_id) => {
                write!(f, "Keine Person mit der ID {} gefunden", staff_id)
            }
            StoreError::InactiveStaff(name) => write!(f, "{} ist deaktiviert", name),
            StoreError::Model(e) => e.fmt(f),
            StoreError::Migration(msg) => write!(f, "Fehler bei Migration: {}", msg),
            StoreError::Diesel(e) => e.fmt(f),
        }
    }
}

impl From<ModelError> for StoreError {
    fn from(e: ModelError) -> Self {
        Self::Model(e)
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        // SQLite reports violated constraints as "UNIQUE constraint failed: staff.pin".
        if let diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info) =
            e
        {
            let message = info.message();
            if message.ends_with("staff.name") {
                return Self::DuplicateCredential(CredentialField::Name);
            } else if message.ends_with("staff.pin") {
                return Self::DuplicateCredential(CredentialField::Pin);
            } else if message.ends_with("staff.cardid") {
                return Self::DuplicateCredential(CredentialField::Cardid);
            }
        }
        Self::Diesel(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub fn establish_connection() -> SqliteConnection {
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut connection = SqliteConnection::establish(&database_url)
        .expect(&format!("Error connecting to {}", database_url));

    // SQLite serializes writers; WAL keeps readers from blocking behind them.
    connection
        .batch_execute(
            "PRAGMA busy_timeout = 10000;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .expect("Error applying connection pragmas");

    log::info!("Connected to {}", database_url);
    connection
}

/// Apply all pending embedded migrations.
pub fn run_migrations(connection: &mut SqliteConnection) -> StoreResult<()> {
    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    for migration in applied {
        log::info!("Applied migration {}", migration);
    }
    Ok(())
}

///*************************/
/// Loading
///*************************/

/// Load all active staff members from the database.
fn load_staff(connection: &mut SqliteConnection) -> StoreResult<Vec<DBStaffMember>> {
    use schema::staff::dsl::*;

    let loaded_staff = staff
        .filter(is_active.eq(true))
        .load::<DBStaffMember>(connection)?;

    Ok(loaded_staff)
}

/// Load all events in the half-open range [start_time, end_time) from the
/// database, ordered by creation time with the insertion id as tie-break.
pub fn load_events_between(
    start_time: Option<NaiveDateTime>,
    end_time: Option<NaiveDateTime>,
    connection: &mut SqliteConnection,
) -> StoreResult<Vec<WorkEventT>> {
    use schema::events::dsl::*;

    let mut query = events
        .order_by(created_at.asc())
        .then_order_by(id.asc())
        .into_boxed();

    if let Some(start_time) = start_time {
        query = query.filter(created_at.ge(start_time));
    }
    if let Some(end_time) = end_time {
        query = query.filter(created_at.lt(end_time));
    }

    let evts = query.load::<WorkEventT>(connection)?;

    Ok(evts)
}

/// Load the active roster with each member's status computed from the events
/// up to current_time.
pub fn load_state(
    current_time: NaiveDateTime,
    connection: &mut SqliteConnection,
) -> StoreResult<Vec<StaffMember>> {
    let loaded_staff = load_staff(connection)?;
    let previous_events = load_events_between(None, Some(current_time), connection)?;
    let staff = staff_compute_status(loaded_staff, &previous_events);

    Ok(staff)
}

///*************************/
/// Saving
///*************************/

/// Save a single staff member into the database.
pub fn save_staff_member(
    staff_member: &StaffMember,
    connection: &mut SqliteConnection,
) -> StoreResult<()> {
    let staff_member = DBStaffMember::from(Cow::Borrowed(staff_member));

    diesel::update(&staff_member)
        .set(&staff_member)
        .execute(connection)?;
    Ok(())
}

pub fn save_staff(staff_v: &[StaffMember], connection: &mut SqliteConnection) -> StoreResult<()> {
    for staff_member in staff_v {
        save_staff_member(staff_member, connection)?;
    }
    Ok(())
}

///*************************/
/// Inserting
///*************************/

pub fn insert_staff(
    staff_member: NewStaffMember,
    connection: &mut SqliteConnection,
) -> StoreResult<StaffMember> {
    use schema::staff::dsl::*;

    let newly_inserted = connection.transaction(|connection| {
        diesel::insert_into(staff)
            .values(&staff_member)
            .execute(connection)?;

        staff.order_by(id.desc()).first::<DBStaffMember>(connection)
    })?;

    log::info!(
        "Registered staff member {} (id {})",
        newly_inserted.name(),
        newly_inserted.id()
    );

    Ok(newly_inserted.with_status(WorkStatus::Away))
}

/// Append an event to the log. The insert and the read-back of the stored row
/// run in one transaction, so a partially written event is never observable.
pub fn insert_event(
    new_event: NewWorkEventT,
    connection: &mut SqliteConnection,
) -> StoreResult<WorkEventT> {
    use schema::events::dsl::*;

    let newly_inserted = connection.transaction(|connection| {
        diesel::insert_into(events)
            .values(&new_event)
            .execute(connection)?;

        events.order_by(id.desc()).first::<WorkEventT>(connection)
    })?;

    Ok(newly_inserted)
}

/// Append an informational annotation to the event log.
pub fn log_info(
    msg: String,
    current_time: NaiveDateTime,
    connection: &mut SqliteConnection,
) -> StoreResult<WorkEventT> {
    insert_event(
        NewWorkEventT::new(current_time, WorkEvent::Info(msg)),
        connection,
    )
}

pub fn insert_password(
    new_password: PasswordHash,
    connection: &mut SqliteConnection,
) -> StoreResult<()> {
    use schema::passwords::dsl::*;

    diesel::insert_into(passwords)
        .values(&new_password)
        .execute(connection)?;
    Ok(())
}

///*************************/
/// Other Queries
///*************************/

pub fn verify_password(password: &str, connection: &mut SqliteConnection) -> StoreResult<bool> {
    use schema::passwords::dsl::*;

    let pws = passwords.load::<PasswordHash>(connection)?;

    for pw in &pws {
        if Pbkdf2
            .verify_password(password.as_ref(), &pw.hash())
            .is_ok()
        {
            return Ok(true);
        }
    }

    log::warn!("Password verification failed");
    Ok(false)
}

/// Look up a staff member by PIN or card id.
/// Distinguishes an unknown credential from one belonging to a deactivated
/// member; the returned member carries the status computed at current_time.
pub fn lookup_staff_by_credential(
    ident: &str,
    current_time: NaiveDateTime,
    connection: &mut SqliteConnection,
) -> StoreResult<StaffMember> {
    use schema::staff::dsl::*;

    let staff_member = staff
        .filter(pin.eq(ident).or(cardid.eq(ident)))
        .first::<DBStaffMember>(connection)
        .optional()?
        .ok_or_else(|| StoreError::UnknownCredential(ident.to_owned()))?;

    if !staff_member.is_active() {
        return Err(StoreError::InactiveStaff(staff_member.name().clone()));
    }

    let previous_events = load_events_between(None, Some(current_time), connection)?;
    Ok(staff_member_compute_status(staff_member, &previous_events))
}

/// The clock-terminal flow: look up the member behind a PIN/card input, flip
/// their status and append the corresponding StatusChange event.
pub fn toggle_work_status(
    ident: &str,
    current_time: NaiveDateTime,
    connection: &mut SqliteConnection,
) -> StoreResult<(StaffMember, WorkEventT)> {
    let mut staff_member = lookup_staff_by_credential(ident, current_time, connection)?;

    let new_status = staff_member.status.toggle();
    staff_member.status = new_status;

    let eventt = insert_event(
        NewWorkEventT::new(
            current_time,
            WorkEvent::StatusChange(staff_member.id(), staff_member.name.clone(), new_status),
        ),
        connection,
    )?;

    Ok((staff_member, eventt))
}

fn staff_compute_status(staff: Vec<DBStaffMember>, events: &[WorkEventT]) -> Vec<StaffMember> {
    staff
        .into_iter()
        .map(move |staff_member| staff_member_compute_status(staff_member, events))
        .collect()
}

/// Scan the event log backwards: the most recent StatusChange for the member
/// wins, a DayBoundary resets to Away, an empty history means Away.
pub fn staff_member_compute_status(
    staff_member: DBStaffMember,
    previous_events: &[WorkEventT],
) -> StaffMember {
    for eventt in previous_events.iter().rev() {
        match &eventt.event {
            WorkEvent::StatusChange(changed_id, _, status) if *changed_id == staff_member.id() => {
                return staff_member.with_status(*status);
            }
            WorkEvent::DayBoundary => {
                return staff_member.with_status(WorkStatus::Away);
            }
            _ => {}
        }
    }

    staff_member.with_status(WorkStatus::Away)
}

/// Toggle the active flag without touching the credentials.
pub fn set_staff_active(
    staff_id: i32,
    active: bool,
    connection: &mut SqliteConnection,
) -> StoreResult<()> {
    use schema::staff::dsl::*;

    let updated = diesel::update(staff.find(staff_id))
        .set(is_active.eq(active))
        .execute(connection)?;

    if updated == 0 {
        return Err(StoreError::UnknownStaff(staff_id));
    }
    Ok(())
}

/// Soft-delete: deactivate the member and release pin and cardid for reuse.
/// Events referencing the member stay in the log untouched.
pub fn deactivate_staff_member(
    staff_member: StaffMember,
    connection: &mut SqliteConnection,
) -> StoreResult<()> {
    use schema::staff::dsl::*;

    let staff_member = DBStaffMember::from(Cow::Owned(staff_member));

    diesel::update(&staff_member)
        .set((
            is_active.eq(false),
            pin.eq(None::<String>),
            cardid.eq(None::<String>),
        ))
        .execute(connection)?;

    Ok(())
}
