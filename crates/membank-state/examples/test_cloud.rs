//! Cloud round trip against a real SurrealDB instance
//! Run with: cargo run --package membank-state --example test_cloud

use std::sync::Arc;

use membank_state::{
    CloudConfig, Engine, HashEmbedder, Metadata, RetrievalEngine, SurrealVectorStore,
};

#[tokio::main]
async fn main() {
    println!("Testing SurrealDB Cloud vector store...");

    let config = match CloudConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Missing environment variables: {}", e);
            std::process::exit(1);
        }
    };
    println!("  Endpoint: {}", config.endpoint);
    println!("  Namespace: {}", config.namespace);
    println!("  Database: {}", config.database);

    let store = match SurrealVectorStore::connect_cloud(config).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("\n✗ Connection failed: {}", e);
            std::process::exit(1);
        }
    };
    println!("\n✓ Connected, memories table ready");

    let engine = Engine::new(Arc::new(HashEmbedder::default()), Arc::new(store));
    let scope = "smoke-test";
    if let Err(e) = engine
        .store(scope, "cloud smoke test memory", Metadata::new())
        .await
    {
        eprintln!("✗ Store failed: {}", e);
        std::process::exit(1);
    }

    let hits = match engine.embed("smoke test").await {
        Ok(q) => engine.query(scope, &q, 3).await,
        Err(e) => Err(e),
    };
    match hits {
        Ok(hits) => println!("✓ Query returned {} record(s)", hits.len()),
        Err(e) => {
            eprintln!("✗ Query failed: {}", e);
            std::process::exit(1);
        }
    }
}
