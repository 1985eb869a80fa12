use chrono::Local;
use dotenv::dotenv;
use std::error::Error;
use stempeluhr::{db, models::NewStaffMember};

fn get_input() -> Result<(String, String, String), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    match (args.next(), args.next(), args.next()) {
        (Some(name), Some(pin), Some(cardid)) => Ok((name, pin, cardid)),
        _ => {
            println!("Usage: add_staff <name> <pin> <cardid>");
            Err("Arguments missing".into())
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let (name, pin, cardid) = get_input()?;
    let new_staff = NewStaffMember::new(name, pin, cardid)?;

    let mut connection = db::establish_connection();
    db::run_migrations(&mut connection)?;

    let staff_member = db::insert_staff(new_staff, &mut connection)?;
    db::log_info(
        format!("{} wurde registriert", staff_member.name),
        Local::now().naive_local(),
        &mut connection,
    )?;

    println!("{} ({})", staff_member.name, staff_member.id());
    Ok(())
}
