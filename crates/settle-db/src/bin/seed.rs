//! # Seed Data Generator
//!
//! Populates a database with a small demo catalog for development.
//!
//! ## Usage
//! ```bash
//! # Seed the database named in settle.toml / SETTLE_DATABASE_PATH
//! cargo run -p settle-db --bin seed
//!
//! # Specify database path and code count
//! cargo run -p settle-db --bin seed -- --db ./data/settle_dev.db --codes 50
//! ```
//!
//! ## Generated Data
//! - An admin and a demo customer with delivery details
//! - Products, two of them featured
//! - Loyalty gifts
//! - Promo code `WELCOME10` (10% off, min RM50) and a RM5 sitewide promotion
//! - Verification codes `DEMO-0001`.. with security code `SEC-0001`..
//! - A few redeemed codes and one placed order for the customer

use chrono::{Duration, Utc};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use settle_core::verification::CodeImportRow;
use settle_core::{Actor, CartLine, DiscountType, Money, Role};
use settle_db::{
    Database, DbConfig, DeliveryProfile, EngineConfig, NewGift, NewProduct, NewPromoCode,
    NewPromotion,
};

/// Demo catalog: name, price in cents, stock
const PRODUCTS: &[(&str, i64, i64)] = &[
    ("Hydrating Serum 30ml", 8900, 40),
    ("Night Repair Cream", 12500, 25),
    ("Sunscreen SPF50", 5900, 60),
    ("Cleansing Oil", 6900, 30),
    ("Travel Kit", 3900, 15),
];

const GIFTS: &[(&str, i64)] = &[("Canvas Tote Bag", 20), ("Ceramic Mug", 10), ("Silk Scrunchie", 50)];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,settle_db=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut codes: usize = 20;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--codes" | "-c" => {
                if i + 1 < args.len() {
                    codes = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Settle Engine Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("      --config <PATH>  TOML config file (default: ./settle.toml)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("  -c, --codes <N>      Verification codes to import (default: 20)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config_path = config_path.unwrap_or_else(|| PathBuf::from("settle.toml"));
    let mut config = EngineConfig::load(Some(&config_path))?;
    if let Some(path) = db_path {
        config.database_path = path;
    }

    println!("🌱 Settle Engine Seed Data Generator");
    println!("====================================");
    println!("Database: {}", config.database_path.display());
    println!();

    let db = Database::new(DbConfig::from_engine(&config))
        .await?
        .with_engine_config(config);

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    // Users
    let admin_user = db.users().register("admin@settle.test", Some("Store Admin"), Role::Admin).await?;
    let admin = Actor::admin(&admin_user.id);
    let customer = db.users().register("customer@settle.test", Some("Demo Customer"), Role::User).await?;
    let shopper = Actor::user(&customer.id);
    db.users()
        .update_profile(
            &shopper,
            &customer.id,
            DeliveryProfile {
                phone_number: Some("+60123456789".to_string()),
                address_line1: Some("12 Jalan Ampang".to_string()),
                city: Some("Kuala Lumpur".to_string()),
                state: Some("WP Kuala Lumpur".to_string()),
                postal_code: Some("50450".to_string()),
                country: Some("MY".to_string()),
                ..Default::default()
            },
        )
        .await?;
    println!("✓ Created admin and demo customer");

    // Catalog
    let mut product_ids = Vec::with_capacity(PRODUCTS.len());
    for (name, price_cents, inventory) in PRODUCTS {
        let product = db
            .products()
            .create(
                &admin,
                NewProduct {
                    name: name.to_string(),
                    price_cents: *price_cents,
                    inventory: *inventory,
                    is_active: true,
                },
            )
            .await?;
        product_ids.push(product.id);
    }
    for id in product_ids.iter().take(2) {
        db.products().set_featured(&admin, id, true).await?;
    }
    println!("✓ Created {} products", product_ids.len());

    for (sort_order, (name, inventory)) in GIFTS.iter().enumerate() {
        db.gifts()
            .create(
                &admin,
                NewGift {
                    name: name.to_string(),
                    description: None,
                    inventory: *inventory,
                    sort_order: sort_order as i64,
                },
            )
            .await?;
    }
    println!("✓ Created {} gifts", GIFTS.len());

    // Discounts
    let now = Utc::now();
    db.discounts()
        .create_promo_code(
            &admin,
            NewPromoCode {
                code: "WELCOME10".to_string(),
                description: Some("10% off your first order".to_string()),
                discount_type: DiscountType::Percentage,
                discount_value: 10,
                min_order_cents: Some(5000),
                start_at: now.to_rfc3339(),
                end_at: (now + Duration::days(90)).to_rfc3339(),
                max_usage: Some(100),
            },
        )
        .await?;
    db.discounts()
        .create_promotion(
            &admin,
            NewPromotion {
                name: "Launch Week".to_string(),
                description: None,
                discount_type: DiscountType::Fixed,
                discount_value: 500,
                start_at: now.to_rfc3339(),
                end_at: (now + Duration::days(7)).to_rfc3339(),
                max_usage: None,
            },
        )
        .await?;
    println!("✓ Created promo code WELCOME10 and promotion 'Launch Week'");

    // Verification codes
    let rows: Vec<CodeImportRow> = (1..=codes)
        .map(|n| CodeImportRow {
            code: format!("DEMO-{:04}", n),
            security_code: format!("SEC-{:04}", n),
            batch: Some("demo".to_string()),
            product_id: product_ids.get(n % product_ids.len()).cloned(),
        })
        .collect();
    let report = db.verification().import(&admin, &rows).await?;
    println!("✓ Imported {} verification codes", report.imported);

    let redeem = codes.min(3);
    for n in 1..=redeem {
        db.verification()
            .redeem(&shopper, &format!("DEMO-{:04}", n), &format!("SEC-{:04}", n))
            .await?;
    }
    println!("✓ Customer redeemed {} codes", redeem);

    // One order through the full checkout path
    let placed = db
        .orders()
        .create_order(
            &shopper,
            &[CartLine::new(&product_ids[0], 1)],
            Some("WELCOME10"),
            Some("Demo order"),
        )
        .await?;
    let subtotal = Money::from_cents(placed.order.subtotal_cents);
    println!(
        "✓ Placed order {} (subtotal {} → total {})",
        placed.order.id,
        subtotal.format_with_currency(&placed.order.currency),
        placed.order.total().format_with_currency(&placed.order.currency)
    );

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
