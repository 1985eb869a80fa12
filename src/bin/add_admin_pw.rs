use dotenv::dotenv;
use pbkdf2::{
    password_hash::{PasswordHasher, SaltString},
    Pbkdf2,
};
use rand_core::OsRng;
use std::error::Error;
use stempeluhr::db;
use stempeluhr::models::PasswordHash;

fn get_input_pw() -> Result<String, Box<dyn Error>> {
    if let Some(password) = std::env::args().nth(1) {
        Ok(password.trim().to_string())
    } else {
        println!("Usage: add_admin_pw <pw>");
        Err("Password missing".into())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let password = get_input_pw()?;
    let salt = SaltString::generate(&mut OsRng);

    // Hash password to PHC string ($pbkdf2-sha256$...)
    let password_hash = Pbkdf2.hash_password(password.as_ref(), &salt)?.to_string();

    let mut connection = db::establish_connection();
    db::run_migrations(&mut connection)?;
    db::insert_password(PasswordHash::new(password_hash), &mut connection)?;

    log::info!("Admin password stored");
    Ok(())
}
