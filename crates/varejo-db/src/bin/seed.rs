//! # Seed Data Generator
//!
//! Populates the database with test products for development.
//!
//! ## Usage
//! ```bash
//! # Generate 500 products (default)
//! cargo run -p varejo-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p varejo-db --bin seed -- --count 2000
//!
//! # Specify database path
//! cargo run -p varejo-db --bin seed -- --db ./data/varejo.db
//! ```
//!
//! Each product gets a unique SKU, a price between 0.99 and 19.99, an
//! on-hand quantity brought in through the stock ledger (so the adjustment
//! log is consistent from the first row) and a minimum stock level.

use chrono::Utc;
use std::env;
use tracing::{info, warn};
use uuid::Uuid;

use varejo_core::{Product, StockReason};
use varejo_db::{Database, DbConfig, NewStockAdjustment};

/// Product families for realistic test data.
const FAMILIES: &[(&str, &[&str])] = &[
    (
        "BEB",
        &[
            "Coca-Cola 350ml",
            "Guarana Antarctica 350ml",
            "Suco de Laranja 1L",
            "Agua Mineral 500ml",
            "Cerveja Pilsen 600ml",
            "Cha Gelado 450ml",
            "Energetico 250ml",
            "Agua com Gas 500ml",
        ],
    ),
    (
        "MER",
        &[
            "Arroz Branco 5kg",
            "Feijao Carioca 1kg",
            "Acucar Cristal 1kg",
            "Cafe Torrado 500g",
            "Macarrao Espaguete 500g",
            "Farinha de Trigo 1kg",
            "Oleo de Soja 900ml",
            "Sal Refinado 1kg",
        ],
    ),
    (
        "LIM",
        &[
            "Detergente 500ml",
            "Sabao em Po 1kg",
            "Agua Sanitaria 1L",
            "Amaciante 2L",
            "Desinfetante 500ml",
            "Esponja de Aco",
            "Papel Toalha",
            "Saco de Lixo 50L",
        ],
    ),
    (
        "PAD",
        &[
            "Pao Frances kg",
            "Pao de Forma",
            "Bolo de Chocolate",
            "Biscoito Recheado",
            "Torrada Integral",
            "Rosquinha de Coco",
            "Pao de Queijo kg",
            "Croissant",
        ],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut db_path = String::from("./varejo_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Varejo Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 500)");
                println!("  -d, --db <PATH>    Database file path (default: ./varejo_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db_path = %db_path, count, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products; skipping seed");
        return Ok(());
    }

    let mut generated = 0usize;
    let start = std::time::Instant::now();

    'outer: for (family_idx, (family_code, names)) in FAMILIES.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for variant in 0..((count / (FAMILIES.len() * names.len())) + 1) {
                if generated >= count {
                    break 'outer;
                }

                let seed = family_idx * 10_000 + name_idx * 100 + variant;
                let product = generate_product(family_code, name, variant, seed);
                let initial_stock = (seed % 101) as i64;

                db.products().insert(&product).await?;

                // Stock arrives through the ledger so the fold invariant
                // holds from row one
                if initial_stock > 0 {
                    db.stock()
                        .apply(&NewStockAdjustment {
                            product_id: product.id.clone(),
                            delta: initial_stock,
                            reason: StockReason::Purchase,
                            reference_id: None,
                        })
                        .await?;
                }

                generated += 1;
                if generated % 100 == 0 {
                    info!(generated, "Seeding progress");
                }
            }
        }
    }

    let elapsed = start.elapsed();
    info!(generated, ?elapsed, "Seed complete");

    Ok(())
}

/// Generates a single product with deterministic pseudo-random data.
fn generate_product(family: &str, name: &str, variant: usize, seed: usize) -> Product {
    let now = Utc::now();

    let sku = format!("{}-{:05}", family, seed);
    let price_cents = 99 + ((seed * 37) % 1900) as i64; // 0.99 - 19.99
    let minimum_stock_level = (seed % 10) as i64;

    let full_name = if variant == 0 {
        name.to_string()
    } else {
        format!("{} ({})", name, variant + 1)
    };

    Product {
        id: Uuid::new_v4().to_string(),
        sku,
        name: full_name,
        price_cents,
        stock_quantity: 0,
        minimum_stock_level,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}
