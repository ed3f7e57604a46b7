use clap::{Parser, Subcommand};
use opsdesk_backend::config::Config;
use opsdesk_backend::models::db_operations::users_db_operations::{self, UserFilter};
use opsdesk_backend::models::UserRole;
use opsdesk_backend::setup::db_setup;
use rusqlite::Connection;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for initial application setup.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Creates every table. Safe to run again.
    Setup,
    /// Inserts the default accounts and demo data into empty tables.
    Seed,
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    List,
    ChangePassword {
        #[arg(long)]
        username: String,
        #[arg(long)]
        new_password: String,
    },
}

#[derive(Subcommand, Debug)]
enum UsersAction {
    /// Puts the default accounts back on their documented passwords.
    ResetDefaultPasswords {
        /// Confirms the reset.
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup => setup_database(&config),
            DbAction::Seed => seed_database(&config),
        },
        Commands::Admin { action } => match action {
            AdminAction::Create { username, email, password } => create_admin_user(&config, username, email, password),
            AdminAction::List => list_admin_users(&config),
            AdminAction::ChangePassword { username, new_password } => {
                change_admin_password(&config, username, new_password)
            }
        },
        Commands::Users { action } => match action {
            UsersAction::ResetDefaultPasswords { yes } => reset_default_passwords(&config, *yes),
        },
    }
}

fn open_database(config: &Config) -> Option<Connection> {
    let db_path = config.database_file();
    if !db_path.exists() {
        eprintln!("❌ Error: Database not found at '{}'. Please run `setup_cli db setup` first.", db_path.display());
        return None;
    }
    match Connection::open(&db_path) {
        Ok(conn) => match conn.execute_batch("PRAGMA foreign_keys = ON;") {
            Ok(()) => Some(conn),
            Err(e) => {
                eprintln!("❌ Error configuring database: {}", e);
                None
            }
        },
        Err(e) => {
            eprintln!("❌ Error opening database: {}", e);
            None
        }
    }
}

fn setup_database(config: &Config) {
    let db_path = config.database_file();
    println!("\nSetting up database at '{}'...", db_path.display());

    let pool = match db_setup::create_pool(&db_path) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("❌ Error creating database: {}", e);
            return;
        }
    };
    let result = pool
        .get()
        .map_err(db_setup::SetupError::from)
        .and_then(|mut conn| db_setup::setup_database(&mut conn));
    match result {
        Ok(()) => println!("✅ Database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up database: {}", e),
    }
}

fn seed_database(config: &Config) {
    let Some(mut conn) = open_database(config) else { return };
    match db_setup::seed_database(&mut conn) {
        Ok(summary) => println!(
            "✅ Seeded {} users, {} tags, {} posts, {} settings, {} attribution rows, {} metric rows.",
            summary.users, summary.tags, summary.posts, summary.settings, summary.attribution_rows, summary.metric_rows
        ),
        Err(e) => eprintln!("❌ Error seeding database: {}", e),
    }
}

fn create_admin_user(config: &Config, username: &str, email: &str, password: &str) {
    let Some(conn) = open_database(config) else { return };
    match users_db_operations::create_user(&conn, username, email, password, UserRole::Admin, true) {
        Ok(_) => println!("✅ Admin user '{}' created successfully.", username),
        Err(e) => eprintln!("❌ Error creating admin user: {}. The username or email might already exist.", e),
    }
}

fn list_admin_users(config: &Config) {
    let Some(conn) = open_database(config) else { return };
    let filter = UserFilter { role: Some(UserRole::Admin), ..Default::default() };
    match users_db_operations::list_users(&conn, &filter, u32::MAX, 0) {
        Ok((admins, _)) => {
            println!("Listing Admin Users:");
            for admin in admins {
                let state = if admin.is_active { "" } else { " (inactive)" };
                println!("- {} <{}>{}", admin.username, admin.email, state);
            }
        }
        Err(e) => eprintln!("❌ Error fetching admins: {}", e),
    }
}

fn change_admin_password(config: &Config, username: &str, new_password: &str) {
    let Some(conn) = open_database(config) else { return };
    let admin = match users_db_operations::read_user_by_username(&conn, username) {
        Ok(Some(user)) if user.role == UserRole::Admin => user,
        Ok(_) => {
            eprintln!("❌ Error: No admin user named '{}' found.", username);
            return;
        }
        Err(e) => {
            eprintln!("❌ Error looking up '{}': {}", username, e);
            return;
        }
    };
    let result = users_db_operations::update_password(&conn, admin.id, new_password)
        .and_then(|_| users_db_operations::delete_sessions_for_user(&conn, admin.id));
    match result {
        Ok(_) => println!("✅ Password for admin user '{}' changed successfully.", username),
        Err(e) => eprintln!("❌ Error updating password: {}", e),
    }
}

fn reset_default_passwords(config: &Config, confirmed: bool) {
    if !confirmed {
        eprintln!("❌ Refusing to reset passwords without --yes.");
        return;
    }
    let Some(conn) = open_database(config) else { return };
    match db_setup::reset_default_passwords(&conn) {
        Ok(count) => println!("✅ Reset the password of {} default account(s).", count),
        Err(e) => eprintln!("❌ Error resetting passwords: {}", e),
    }
}
