//! Address book of mail recipients.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row as _;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::{is_unique_violation_on, Result, VaultError};
use crate::models::{format_ts_iso, now_millis, Contact, NewContact};

static EMAIL_FORMAT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\w+([.-]?\w+)*@\w+([.-]?\w+)*(\.\w{2,3})+$").ok());

/// Address format accepted for stored contacts.
pub fn is_valid_contact_email(email: &str) -> bool {
    EMAIL_FORMAT.as_ref().is_some_and(|re| re.is_match(email))
}

fn contact_from_row(row: &SqliteRow) -> Contact {
    Contact {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        description: row.get("description"),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
    }
}

/// All contacts, sorted by name.
pub async fn list_contacts(pool: &SqlitePool) -> Result<Vec<Contact>> {
    let rows = sqlx::query(
        "SELECT id, name, email, description, created_at, updated_at \
         FROM contacts ORDER BY name COLLATE NOCASE ASC, rowid ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(contact_from_row).collect())
}

pub async fn get_contact(pool: &SqlitePool, id: &str) -> Result<Option<Contact>> {
    let row = sqlx::query(
        "SELECT id, name, email, description, created_at, updated_at \
         FROM contacts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(contact_from_row))
}

/// Create a contact.
///
/// Name and email are required and trimmed; the email must be well
/// formed and not already present.
pub async fn add_contact(pool: &SqlitePool, input: &NewContact) -> Result<Contact> {
    let name = input.name.as_deref().map(str::trim).unwrap_or_default();
    let email = input.email.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() || email.is_empty() {
        return Err(VaultError::validation("Name and email are required"));
    }
    if !is_valid_contact_email(email) {
        return Err(VaultError::validation("Invalid email format"));
    }
    let description = input
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();

    let id = Uuid::new_v4().to_string();
    let now = now_millis();

    let result = sqlx::query(
        "INSERT INTO contacts (id, name, email, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(email)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation_on(&e, "contacts.email") => {
            return Err(VaultError::conflict(
                "Contact with this email already exists",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(%id, email, "contact added");

    Ok(Contact {
        id,
        name: name.to_string(),
        email: email.to_string(),
        description: description.to_string(),
        created_at: format_ts_iso(now),
        updated_at: format_ts_iso(now),
    })
}

pub async fn delete_contact(pool: &SqlitePool, id: &str) -> Result<()> {
    let id = id.trim();
    if id.is_empty() {
        return Err(VaultError::validation("Contact ID is required"));
    }

    let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(VaultError::not_found("Contact not found"));
    }

    tracing::info!(%id, "contact deleted");
    Ok(())
}

/// Sample recipients for trying out the mail flow.
const SAMPLE_CONTACTS: &[(&str, &str, &str)] = &[
    ("Alice Carter", "alice.carter@example.com", "Finance lead"),
    ("Ben Foster", "ben.foster@example.com", "Operations"),
    ("Chloe Hughes", "chloe.hughes@example.com", "Data analyst"),
    ("Daniel Reed", "daniel.reed@example.com", "Sales manager"),
    ("Emma Walsh", "emma.walsh@example.com", "Customer support"),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedResults {
    pub added: Vec<String>,
    pub existing: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub results: SeedResults,
    pub total_contacts: i64,
}

impl SeedReport {
    pub fn summary(&self) -> String {
        format!(
            "Added {} test contacts, {} already existed",
            self.results.added.len(),
            self.results.existing.len()
        )
    }
}

/// Insert the sample contacts, skipping any whose email already exists.
pub async fn seed_test_contacts(pool: &SqlitePool) -> Result<SeedReport> {
    let mut results = SeedResults::default();

    for (name, email, description) in SAMPLE_CONTACTS {
        let input = NewContact {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            description: Some(description.to_string()),
        };
        let label = format!("{} ({})", name, email);
        match add_contact(pool, &input).await {
            Ok(_) => results.added.push(label),
            Err(VaultError::Conflict(_)) => results.existing.push(label),
            Err(e) => {
                tracing::warn!(email, error = %e, "failed to seed contact");
                results.errors.push(format!("{}: {}", email, e));
            }
        }
    }

    let total_contacts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
        .fetch_one(pool)
        .await?;

    Ok(SeedReport {
        results,
        total_contacts,
    })
}

// ============ CLI entry points ============

pub async fn run_list(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let contacts = list_contacts(&pool).await;
    pool.close().await;
    let contacts = contacts?;

    if contacts.is_empty() {
        println!("No contacts.");
        return Ok(());
    }

    println!("{:<36}  {:<24}  {:<32}  DESCRIPTION", "ID", "NAME", "EMAIL");
    for c in &contacts {
        println!(
            "{:<36}  {:<24}  {:<32}  {}",
            c.id, c.name, c.email, c.description
        );
    }
    Ok(())
}

pub async fn run_add(config: &Config, input: &NewContact) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let contact = add_contact(&pool, input).await;
    pool.close().await;
    let contact = contact?;

    println!("added {} <{}>", contact.name, contact.email);
    println!("  id: {}", contact.id);
    Ok(())
}

pub async fn run_remove(config: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = delete_contact(&pool, id).await;
    pool.close().await;
    result?;

    println!("removed {}", id);
    Ok(())
}

pub async fn run_seed(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let report = seed_test_contacts(&pool).await;
    pool.close().await;
    let report = report?;

    println!("{}", report.summary());
    for err in &report.results.errors {
        println!("  error: {}", err);
    }
    println!("total contacts: {}", report.total_contacts);
    Ok(())
}
