//! # Seed Data Generator
//!
//! Populates a database with a demo shop for development.
//!
//! ## Usage
//! ```bash
//! cargo run -p tally-db --bin seed
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db --shop shop-main
//! ```
//!
//! ## Generated Data
//! - One product per entry in [`CATALOG`], each with two purchase layers at
//!   different unit costs so FIFO costing has something to walk through
//! - A `purchase` stock movement per layer, so opening stock is audited
//! - Two customers, one with a credit limit

use chrono::{Duration, Utc};
use std::env;
use tally_core::{
    CostLayer, CostSourceType, Customer, MovementAction, NewStockMovement, Product, Quantity,
};
use tally_db::{
    CostLayerRepository, CustomerRepository, Database, DbConfig, MovementRepository,
    ProductRepository,
};
use uuid::Uuid;

/// (sku, name, first cost, second cost, selling price), all in cents.
const CATALOG: &[(&str, &str, i64, i64, i64)] = &[
    ("RICE-5KG", "Rice 5kg", 1000, 1200, 1800),
    ("SUGAR-1KG", "Sugar 1kg", 250, 270, 400),
    ("OIL-1L", "Cooking Oil 1L", 450, 480, 700),
    ("FLOUR-2KG", "Maize Flour 2kg", 300, 320, 500),
    ("SOAP-BAR", "Bar Soap", 90, 95, 150),
    ("TEA-250G", "Tea Leaves 250g", 380, 400, 600),
    ("SALT-1KG", "Salt 1kg", 60, 60, 100),
    ("MILK-500ML", "Milk 500ml", 110, 125, 180),
];

/// Units received per layer.
const LAYER_UNITS: i64 = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./tally_dev.db");
    let mut shop_id = String::from("shop-demo");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--shop" | "-s" => {
                if i + 1 < args.len() {
                    shop_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -s, --shop <ID>    Shop id to seed (default: shop-demo)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Tally Seed Data Generator");
    println!("=========================");
    println!("Database: {}", db_path);
    println!("Shop:     {}", shop_id);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database, migrations applied");

    let mut conn = db.acquire().await?;
    let existing = ProductRepository::new(&mut conn).count(&shop_id).await?;
    drop(conn);
    if existing > 0 {
        println!("⚠ Shop already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    seed_shop(&db, &shop_id).await?;

    println!("✓ Seeded {} products ({} layers and movements each)", CATALOG.len(), 2);
    println!("✓ Seeded 2 customers");
    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Writes the demo catalog and customers for `shop_id` in one transaction.
async fn seed_shop(db: &Database, shop_id: &str) -> Result<(), tally_db::DbError> {
    let mut tx = db.begin().await?;
    let received = Utc::now() - Duration::days(14);
    let batch = Quantity::from_units(LAYER_UNITS);

    for (sku, name, first_cost, second_cost, price) in CATALOG {
        let product = demo_product(shop_id, sku, name, *second_cost, *price);
        ProductRepository::new(&mut tx).insert(&product).await?;

        let mut layers = CostLayerRepository::new(&mut tx);
        layers
            .insert(&purchase_layer(&product, *first_cost, received))
            .await?;
        layers
            .insert(&purchase_layer(&product, *second_cost, received + Duration::days(7)))
            .await?;

        let mut movements = MovementRepository::new(&mut tx);
        let mut on_hand = Quantity::zero();
        for _ in 0..2 {
            let next = on_hand + batch;
            movements
                .insert(&opening_movement(&product, on_hand, next))
                .await?;
            on_hand = next;
        }
    }

    let mut customers = CustomerRepository::new(&mut tx);
    customers
        .insert(&demo_customer(shop_id, "Walk-in Account", None))
        .await?;
    customers
        .insert(&demo_customer(shop_id, "Corner Kiosk", Some(50_000)))
        .await?;

    tx.commit().await?;
    Ok(())
}

fn demo_product(shop_id: &str, sku: &str, name: &str, cost: i64, price: i64) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4().to_string(),
        shop_id: shop_id.to_string(),
        sku: sku.to_string(),
        name: name.to_string(),
        // Two layers of LAYER_UNITS, in milli-units
        stock_quantity: 2 * LAYER_UNITS * 1_000,
        cost_price_cents: cost,
        selling_price_cents: price,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

fn opening_movement(product: &Product, previous: Quantity, new: Quantity) -> NewStockMovement {
    NewStockMovement {
        product_id: product.id.clone(),
        shop_id: product.shop_id.clone(),
        action: MovementAction::Purchase,
        quantity_delta: new - previous,
        previous_quantity: previous,
        new_quantity: new,
        actor_id: "seed".to_string(),
        notes: Some("Opening stock".to_string()),
    }
}

fn purchase_layer(
    product: &Product,
    unit_cost: i64,
    received_at: chrono::DateTime<Utc>,
) -> CostLayer {
    let id = Uuid::new_v4().to_string();
    CostLayer {
        id: id.clone(),
        product_id: product.id.clone(),
        shop_id: product.shop_id.clone(),
        unit_cost_cents: unit_cost,
        initial_quantity: LAYER_UNITS * 1_000,
        remaining_quantity: LAYER_UNITS * 1_000,
        source_type: CostSourceType::Purchase,
        source_id: Some(format!("seed-{id}")),
        received_at,
        created_at: Utc::now(),
    }
}

fn demo_customer(shop_id: &str, name: &str, limit: Option<i64>) -> Customer {
    let now = Utc::now();
    Customer {
        id: Uuid::new_v4().to_string(),
        shop_id: shop_id.to_string(),
        name: name.to_string(),
        phone: None,
        credit_balance_cents: 0,
        credit_limit_cents: limit,
        created_at: now,
        updated_at: now,
    }
}
