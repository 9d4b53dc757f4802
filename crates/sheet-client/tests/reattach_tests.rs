use std::sync::atomic::Ordering;
use std::sync::Arc;

use actix_web::{web, App};
use chrono::{Duration, Utc};
use lopdf::{Dictionary, Document, Object, Stream};
use tempfile::TempDir;

use sheet_client::{
    store_key, ClientError, JobStore, MemoryJobStore, SheetClient, StoredJob, StoredStatus,
    UploadRequest,
};
use sheet_protocol::PageOrder;
use sheet_server::config::ServerConfig;
use sheet_server::routes;
use sheet_server::state::AppState;

fn pdf_bytes(page_heights: &[f32]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for &height in page_heights {
        let content_id = doc.add_object(Stream::new(Dictionary::new(), b"q Q".to_vec()));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(612.0),
                    Object::Real(height),
                ]),
            ),
            ("Resources", Object::Dictionary(Dictionary::new())),
            ("Contents", Object::Reference(content_id)),
        ]));
        kids.push(Object::Reference(page_id));
    }

    let pages_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(kids)),
        ("Count", Object::Integer(page_heights.len() as i64)),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

async fn spawn_server(dir: &TempDir) -> (web::Data<AppState>, actix_test::TestServer) {
    let config = ServerConfig {
        storage_directory: dir.path().to_path_buf(),
        ..Default::default()
    };
    let state = web::Data::new(AppState::new(config));
    state.store.ensure_dir().await.unwrap();

    let app_state = state.clone();
    let srv = actix_test::start(move || {
        App::new().app_data(app_state.clone()).service(
            web::scope("/api/pdf")
                .service(routes::process::process_with_progress)
                .service(routes::process::process_sync)
                .service(routes::progress::progress_stream)
                .service(routes::status::job_status)
                .service(routes::download::download)
                .service(routes::health::health),
        )
    });

    (state, srv)
}

fn upload(page_heights: &[f32], name: &str) -> UploadRequest {
    UploadRequest {
        file_name: name.to_string(),
        bytes: pdf_bytes(page_heights),
        rotation: 0,
        order: PageOrder::Norm,
    }
}

#[actix_web::test]
async fn submit_streams_to_completion() {
    let dir = TempDir::new().unwrap();
    let (state, srv) = spawn_server(&dir).await;
    let store = Arc::new(MemoryJobStore::new());
    let client = SheetClient::new(format!("http://{}", srv.addr()), store.clone());

    let request = upload(&[792.0; 3], "stream.pdf");
    let fingerprint = request.fingerprint();
    let result = client.submit(request).await.unwrap();

    assert!(result.success);
    assert_eq!(result.input_pages, 3);
    assert_eq!(result.output_pages, 1);
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 1);

    // Terminal status is persisted for the next reload.
    let entry = store.get(&store_key(&fingerprint)).unwrap();
    assert_eq!(entry.status, StoredStatus::Completed);
}

#[actix_web::test]
async fn reloaded_client_reattaches_without_second_upload() {
    let dir = TempDir::new().unwrap();
    let (state, srv) = spawn_server(&dir).await;
    let base_url = format!("http://{}", srv.addr());
    let store = Arc::new(MemoryJobStore::new());

    let first = SheetClient::new(base_url.clone(), store.clone());
    let result = first.submit(upload(&[792.0; 2], "reload.pdf")).await.unwrap();

    // A "reloaded" client shares the persisted store, recomputes the same
    // fingerprint, and resolves via the status endpoint.
    let second = SheetClient::new(base_url, store.clone());
    let again = second.submit(upload(&[792.0; 2], "reload.pdf")).await.unwrap();

    assert_eq!(again, result);
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn concurrent_submits_coalesce_to_one_operation() {
    let dir = TempDir::new().unwrap();
    let (state, srv) = spawn_server(&dir).await;
    let store = Arc::new(MemoryJobStore::new());
    let client = Arc::new(SheetClient::new(
        format!("http://{}", srv.addr()),
        store.clone(),
    ));

    let a = {
        let client = Arc::clone(&client);
        let request = upload(&[792.0; 2], "burst.pdf");
        tokio::spawn(async move { client.submit(request).await })
    };
    let b = {
        let client = Arc::clone(&client);
        let request = upload(&[792.0; 2], "burst.pdf");
        tokio::spawn(async move { client.submit(request).await })
    };

    let ra = a.await.unwrap().unwrap();
    let rb = b.await.unwrap().unwrap();
    assert_eq!(ra, rb);
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn stale_store_entry_is_purged_and_upload_proceeds() {
    let dir = TempDir::new().unwrap();
    let (state, srv) = spawn_server(&dir).await;
    let store = Arc::new(MemoryJobStore::new());
    let client = SheetClient::new(format!("http://{}", srv.addr()), store.clone());

    let request = upload(&[792.0; 2], "stale.pdf");
    let key = store_key(&request.fingerprint());
    store.put(
        &key,
        StoredJob {
            job_id: "deadbeef0000".into(),
            status: StoredStatus::Processing,
            updated_at: Utc::now() - Duration::hours(2),
        },
    );

    let result = client.submit(request).await.unwrap();
    assert!(result.success);
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn unknown_persisted_job_falls_through_to_upload() {
    // Simulates a server restart: the persisted job id 404s, the client
    // invalidates local state and re-uploads instead of failing.
    let dir = TempDir::new().unwrap();
    let (state, srv) = spawn_server(&dir).await;
    let store = Arc::new(MemoryJobStore::new());
    let client = SheetClient::new(format!("http://{}", srv.addr()), store.clone());

    let request = upload(&[792.0; 2], "restart.pdf");
    let key = store_key(&request.fingerprint());
    store.put(
        &key,
        StoredJob {
            job_id: "deadbeef0000".into(),
            status: StoredStatus::Processing,
            updated_at: Utc::now(),
        },
    );

    let result = client.submit(request).await.unwrap();
    assert!(result.success);
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 1);

    let entry = store.get(&key).unwrap();
    assert_ne!(entry.job_id, "deadbeef0000");
    assert_eq!(entry.status, StoredStatus::Completed);
}

#[actix_web::test]
async fn missing_event_stream_falls_back_to_polling() {
    // The progress route is not mounted, so the stream request 404s and
    // the client must resolve the job by polling the status endpoint.
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        storage_directory: dir.path().to_path_buf(),
        ..Default::default()
    };
    let state = web::Data::new(AppState::new(config));
    state.store.ensure_dir().await.unwrap();

    let app_state = state.clone();
    let srv = actix_test::start(move || {
        App::new().app_data(app_state.clone()).service(
            web::scope("/api/pdf")
                .service(routes::process::process_with_progress)
                .service(routes::status::job_status),
        )
    });

    let store = Arc::new(MemoryJobStore::new());
    let client = SheetClient::new(format!("http://{}", srv.addr()), store);

    let result = client.submit(upload(&[792.0; 2], "poll.pdf")).await.unwrap();
    assert!(result.success);
    assert_eq!(result.output_pages, 1);
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn failed_job_surfaces_error_and_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let (state, srv) = spawn_server(&dir).await;
    let store = Arc::new(MemoryJobStore::new());
    let client = SheetClient::new(format!("http://{}", srv.addr()), store.clone());

    // A page taller than any sheet fails composition.
    let request = upload(&[3000.0], "toolarge.pdf");
    let err = client.submit(request.clone()).await.unwrap_err();
    assert!(matches!(err, ClientError::JobFailed(_)));

    // Failed work is not cached server-side; a retry runs fresh.
    let err = client.submit(request).await.unwrap_err();
    assert!(matches!(err, ClientError::JobFailed(_)));
    assert_eq!(state.compositions_started.load(Ordering::SeqCst), 2);
}
