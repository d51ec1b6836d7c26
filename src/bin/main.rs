use receipt_ingest_orchestrator::{
    assembler::TransactionAssembler,
    categories::CategoryResolver,
    engines::ScriptedEngine,
    models::{EngineKind, RawEngineItem, RawEngineResult},
    orchestrator::ExtractionOrchestrator,
    service::{AutoFileOutcome, ReceiptIngestService},
    stores::{InMemoryBlobStore, InMemoryCategoryStore, InMemoryTransactionStore},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn sample_receipt() -> RawEngineResult {
    RawEngineResult {
        store_name: Some("Corner Market".into()),
        date: Some("2024-03-02".into()),
        items: vec![
            RawEngineItem {
                name: "Milk".into(),
                price: Some("$3.49".into()),
                quantity: Some(1.0),
            },
            RawEngineItem {
                name: "Bread".into(),
                price: Some("$2.50".into()),
                quantity: Some(1.0),
            },
        ],
        subtotal: Some("$5.99".into()),
        tax: Some("$0.48".into()),
        total: Some("$6.47".into()),
        confidence: Some(94),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Receipt ingestion demo starting");

    let blob_store = Arc::new(InMemoryBlobStore::new());
    let categories = Arc::new(InMemoryCategoryStore::new());
    let transactions = Arc::new(InMemoryTransactionStore::new());

    let orchestrator = ExtractionOrchestrator::new(
        Arc::new(ScriptedEngine::always(EngineKind::Offline, sample_receipt())),
        Arc::new(ScriptedEngine::always(EngineKind::Cloud, sample_receipt())),
    );

    let service = ReceiptIngestService::new(
        orchestrator,
        CategoryResolver::new(categories),
        TransactionAssembler::new(blob_store.clone()),
        transactions.clone(),
        blob_store,
    );

    let owner = Uuid::new_v4();

    // FLOW A: one receipt upload, auto-filed.
    let outcome = service
        .upload_and_auto_file(
            b"fake jpeg bytes",
            "image/jpeg",
            "corner-market.jpg",
            None,
            Some("Groceries"),
            owner,
        )
        .await?;

    println!("\n=== RECEIPT UPLOAD ===");
    match &outcome {
        AutoFileOutcome::Filed {
            transaction,
            receipt,
        } => {
            println!("Filed transaction {}", transaction.id);
            println!("  amount:     {:.2}", transaction.amount);
            println!("  store:      {}", receipt.store_name.as_deref().unwrap_or("?"));
            println!("  confidence: {}", receipt.confidence_score);
        }
        AutoFileOutcome::ReviewRequired { receipt, .. } => {
            println!("Held for review: {:?}", receipt.review_reasons);
        }
        AutoFileOutcome::Degraded { error, .. } => {
            println!("Degraded to manual entry: {}", error);
        }
    }

    // FLOW B: a small tabular import.
    let text = "Date,Description,Amount,Category\n\
                2024-01-05,Grocery Store,-45.20,Groceries\n\
                2024-01-06,Paycheck,2000,Salary\n\
                not-a-date,Broken line,10";

    let summary = service.import_tabular(text, owner).await?;

    println!("\n=== TABULAR IMPORT ===");
    println!("Imported: {}", summary.imported_count);
    println!("Errors:   {}", summary.error_count);
    for error in &summary.errors {
        println!("  line {}: {}", error.line_number, error.reason);
    }

    println!(
        "\nTotal transactions persisted: {}",
        transactions.all().await.len()
    );

    Ok(())
}
