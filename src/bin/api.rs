use receipt_ingest_orchestrator::{
    api::start_server,
    assembler::TransactionAssembler,
    categories::CategoryResolver,
    engines::{CloudVisionEngine, OfflineOcrEngine},
    orchestrator::ExtractionOrchestrator,
    service::ReceiptIngestService,
    stores::{
        postgres, BlobStore, CategoryStore, FsBlobStore, InMemoryCategoryStore,
        InMemoryTransactionStore, PgCategoryStore, PgTransactionStore, TransactionStore,
    },
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let storage_root =
        std::env::var("RECEIPT_STORAGE_ROOT").unwrap_or_else(|_| "./receipt-storage".to_string());
    let blob_store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&storage_root));

    // Engine endpoints
    let cloud_url = std::env::var("CLOUD_VISION_URL")
        .unwrap_or_else(|_| "https://vision.example.com".to_string());
    let cloud_api_key = std::env::var("CLOUD_VISION_API_KEY").unwrap_or_else(|_| {
        warn!("CLOUD_VISION_API_KEY not set; cloud extraction will be rejected");
        String::new()
    });
    let offline_url = std::env::var("OFFLINE_OCR_URL")
        .unwrap_or_else(|_| receipt_ingest_orchestrator::engines::offline::DEFAULT_SIDECAR_URL.to_string());

    let orchestrator = ExtractionOrchestrator::new(
        Arc::new(OfflineOcrEngine::new(offline_url)),
        Arc::new(CloudVisionEngine::new(
            cloud_url,
            cloud_api_key,
            blob_store.clone(),
        )),
    );

    // Persistence: postgres when configured, in-memory otherwise.
    let (category_store, transaction_store): (Arc<dyn CategoryStore>, Arc<dyn TransactionStore>) =
        match std::env::var("DATABASE_URL").ok() {
            Some(url) => match postgres::connect_lazy(&url) {
                Ok(pool) => {
                    info!("Persistence backend: postgres");
                    (
                        Arc::new(PgCategoryStore::new(pool.clone())),
                        Arc::new(PgTransactionStore::new(pool)),
                    )
                }
                Err(e) => {
                    warn!("Failed to initialize postgres, falling back to in-memory: {}", e);
                    (
                        Arc::new(InMemoryCategoryStore::new()),
                        Arc::new(InMemoryTransactionStore::new()),
                    )
                }
            },
            None => {
                info!("Persistence backend: in-memory");
                (
                    Arc::new(InMemoryCategoryStore::new()),
                    Arc::new(InMemoryTransactionStore::new()),
                )
            }
        };

    let service = Arc::new(ReceiptIngestService::new(
        orchestrator,
        CategoryResolver::new(category_store),
        TransactionAssembler::new(blob_store.clone()),
        transaction_store,
        blob_store,
    ));

    info!("Receipt ingestion API server starting on port {}", port);

    start_server(service, port).await?;

    Ok(())
}
