//! Demo data for local development.
//!
//! ```text
//! seed                               insert the demo users (default)
//! seed list                          print active users
//! seed user <email> <password> <first> <last>
//! ```

use anyhow::Context;
use userauth::{
    auth::validation::validate_registration,
    config::AppConfig,
    db,
    users::{repo::UserRepo, repo_types::RepoError},
};

const DEMO_USERS: &[(&str, &str, &str, &str)] = &[
    ("john.doe@example.com", "SecurePass123!", "John", "Doe"),
    ("jane.smith@example.com", "StrongPass456!", "Jane", "Smith"),
    ("admin@yoursite.com", "AdminPass789!", "Admin", "User"),
    ("demo@example.com", "DemoPass123!", "Demo", "User"),
    ("test.user@example.com", "TestPass456!", "Test", "User"),
];

#[derive(Debug, Default)]
struct Summary {
    created: usize,
    skipped: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    userauth::init_tracing();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config).await?;
    db::migrate(&pool).await?;
    let repo = UserRepo::new(pool, config.hashing, config.lockout);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["seed"] => seed(&repo).await,
        ["list"] => list(&repo).await,
        ["user", email, password, first, last] => {
            create_one(&repo, email, password, first, last).await
        }
        _ => anyhow::bail!(
            "usage: seed [seed | list | user <email> <password> <first> <last>]"
        ),
    }
}

async fn seed(repo: &UserRepo) -> anyhow::Result<()> {
    let mut summary = Summary::default();
    for (email, password, first, last) in DEMO_USERS {
        match repo.create(email, password, first, last).await {
            Ok(user) => {
                println!("created  {} ({})", user.email, user.full_name());
                summary.created += 1;
            }
            Err(RepoError::DuplicateEmail) => {
                println!("skipped  {email} (already exists)");
                summary.skipped += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, email, "seeding user failed");
                summary.failed += 1;
            }
        }
    }

    println!(
        "\ncreated {}, skipped {}, failed {} of {}",
        summary.created,
        summary.skipped,
        summary.failed,
        DEMO_USERS.len()
    );
    if summary.created > 0 {
        println!("\n{:<28} password", "email");
        for (email, password, _, _) in DEMO_USERS {
            println!("{email:<28} {password}");
        }
    }
    println!("\ntotal active users: {}", repo.count_active().await?);
    Ok(())
}

async fn list(repo: &UserRepo) -> anyhow::Result<()> {
    let users = repo.list_active(100, 0).await?;
    let total = repo.count_active().await?;
    if users.is_empty() {
        println!("no users found");
        return Ok(());
    }

    println!("{total} users:");
    println!("{:<4} {:<28} {:<20} created", "id", "email", "name");
    for user in users {
        println!(
            "{:<4} {:<28} {:<20} {}",
            user.id,
            user.email,
            user.full_name(),
            user.created_at.date()
        );
    }
    Ok(())
}

async fn create_one(
    repo: &UserRepo,
    email: &str,
    password: &str,
    first: &str,
    last: &str,
) -> anyhow::Result<()> {
    if let Err(errors) = validate_registration(email, password, first, last) {
        for e in &errors {
            eprintln!("{}: {}", e.field, e.message);
        }
        anyhow::bail!("invalid user");
    }

    match repo.create(email, password, first, last).await {
        Ok(user) => println!("created {} (id {})", user.email, user.id),
        Err(RepoError::DuplicateEmail) => println!("{email} already exists"),
        Err(e) => return Err(e).context("create user"),
    }
    Ok(())
}
