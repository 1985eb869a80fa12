use chrono::{NaiveDate, NaiveTime};
use dotenv::dotenv;
use std::error::Error;
use stempeluhr::{
    db,
    models::{NewWorkEventT, WorkEvent},
};

const START_YEAR: i32 = 2020;
const YEARS: usize = 30;

fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let mut connection = db::establish_connection();
    db::run_migrations(&mut connection)?;

    // One second before 6am, so the boundary sorts before anything that
    // happens on the new day.
    let boundary_time = NaiveTime::from_hms_opt(5, 59, 59).unwrap();
    let mut current_date = NaiveDate::from_yo_opt(START_YEAR, 1).unwrap();

    for _ in 0..365 * YEARS {
        db::insert_event(
            NewWorkEventT::new(current_date.and_time(boundary_time), WorkEvent::DayBoundary),
            &mut connection,
        )?;
        current_date = current_date.succ_opt().unwrap();
    }

    log::info!(
        "Inserted {} day boundaries starting {}",
        365 * YEARS,
        START_YEAR
    );
    Ok(())
}
