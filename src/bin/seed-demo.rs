//! Demo data seed script
//!
//! Seeds the reference collections a fresh deployment needs before any
//! pickup can be requested:
//! - 2 teachers, 2 parents (users)
//! - school classes for grades 1-5 (one class left without a teacher to
//!   exercise the missing-teacher path)
//! - kindergarten groups with children
//! - students distributed across the classes
//!
//! Usage:
//!   seed-demo --database-url postgres://... --redis-url redis://...
//!   (both flags fall back to DATABASE_URL / REDIS_URL)
//!
//! Pickup requests are never touched: request history is append-only.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::env;
use uuid::Uuid;

use pickup_api::store::{collections, pg::PgStore, DocumentStore};

#[derive(Parser)]
#[command(name = "seed-demo", about = "Seed demo classes, groups and rosters")]
struct Args {
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let database_url = args
        .database_url
        .or_else(|| env::var("DATABASE_URL").ok())
        .context("DATABASE_URL required")?;
    let redis_url = args
        .redis_url
        .or_else(|| env::var("REDIS_URL").ok())
        .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

    println!("=== Seed Demo Data ===");

    let store = PgStore::connect(&database_url, &redis_url)
        .await
        .context("Failed to connect to store")?;

    // 1. Clean reference collections (requests stay).
    println!("Cleaning reference collections...");
    sqlx::query(
        "DELETE FROM documents
         WHERE collection IN ('classes', 'groups', 'students', 'children', 'users')",
    )
    .execute(store.pool())
    .await
    .context("Failed to wipe reference collections")?;

    // 2. Users.
    println!("Creating users...");
    let school_teacher = store
        .create(collections::USERS, json!({ "role": "teacher" }))
        .await?;
    let group_teacher = store
        .create(collections::USERS, json!({ "role": "teacher" }))
        .await?;
    for _ in 0..2 {
        store
            .create(collections::USERS, json!({ "role": "parent" }))
            .await?;
    }

    // 3. School classes, grades 1-5, letters A/B.
    println!("Creating classes and students...");
    let mut class_ids: Vec<Uuid> = Vec::new();
    for number in 1..=5 {
        for name in ["A", "B"] {
            // 5-B deliberately has no teacher.
            let teacher_id = if number == 5 && name == "B" {
                None
            } else {
                Some(school_teacher.id)
            };
            let class = store
                .create(
                    collections::CLASSES,
                    json!({ "name": name, "number": number, "teacher_id": teacher_id }),
                )
                .await?;
            class_ids.push(class.id);
        }
    }

    let student_names = [
        "Aziza Karimova",
        "Bobur Toshmatov",
        "Diyor Karimov",
        "Gulnora Rahimova",
        "Jasur Aliyev",
        "Madina Yusupova",
        "Nodira Islomova",
        "Otabek Saidov",
        "Sevara Umarova",
        "Timur Nazarov",
    ];
    for (i, name) in student_names.iter().enumerate() {
        let class_id = class_ids[i % class_ids.len()];
        store
            .create(
                collections::STUDENTS,
                json!({ "name": name, "class_id": class_id }),
            )
            .await?;
    }

    // 4. Kindergarten groups and children.
    println!("Creating groups and children...");
    let mut group_ids: Vec<Uuid> = Vec::new();
    for name in ["Quyoshcha", "Yulduzcha", "Kapalak"] {
        let group = store
            .create(
                collections::GROUPS,
                json!({ "name": name, "teacher_id": group_teacher.id }),
            )
            .await?;
        group_ids.push(group.id);
    }

    let child_names = [
        ("Ali", "Valiyev"),
        ("Zilola", "Akbarova"),
        ("Sardor", "Qodirov"),
        ("Nilufar", "Sobirova"),
        ("Akmal", "Ergashev"),
        ("Dilnoza", "Mirzayeva"),
    ];
    for (i, (name, last_name)) in child_names.iter().enumerate() {
        let group_id = group_ids[i % group_ids.len()];
        store
            .create(
                collections::CHILDREN,
                json!({ "name": name, "last_name": last_name, "group_id": group_id }),
            )
            .await?;
    }

    println!("Done.");
    println!("  school teacher: {}", school_teacher.id);
    println!("  group teacher:  {}", group_teacher.id);
    println!("  classes: {} (5-B has no teacher)", class_ids.len());
    println!("  groups:  {}", group_ids.len());

    Ok(())
}
