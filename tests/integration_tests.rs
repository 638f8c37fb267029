//! Integration tests against a mock restaurant backend

use std::collections::BTreeMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use futures_util::StreamExt;
use kitchen_scanner::OurError;
use kitchen_scanner::api::client::graph_save_name;
use kitchen_scanner::api::types::{
    DishPhoto, GenerateDishesRequest, GenerationType, Ingredient, NewDish, NewMenu,
};
use kitchen_scanner::api::{ApiClient, Detection};
use kitchen_scanner::config::{RenderPolicy, Settings};
use kitchen_scanner::dispatcher::UploadDispatcher;
use kitchen_scanner::image_batch::{ImageBatch, PreviewRegistry, parse_preview_url};
use kitchen_scanner::ingredient_store::IngredientStore;
use kitchen_scanner::renderer::ResultRenderer;
use kitchen_scanner::server::{AppState, build_router};
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;
use url::Url;

/// One multipart field as the backend received it
#[derive(Debug, Clone)]
struct ReceivedField {
    name: String,
    file_name: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ReceivedUpload {
    path: &'static str,
    fields: Vec<ReceivedField>,
}

#[derive(Clone, Default)]
struct MockBackend {
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
    frame_delay_ms: u64,
}

impl MockBackend {
    fn uploads_to(&self, path: &str) -> Vec<ReceivedUpload> {
        self.uploads
            .lock()
            .expect("uploads lock")
            .iter()
            .filter(|u| u.path == path)
            .cloned()
            .collect()
    }

    async fn record(&self, path: &'static str, mut multipart: Multipart) -> Vec<ReceivedField> {
        let mut fields = Vec::new();
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            fields.push(ReceivedField {
                name,
                file_name,
                bytes,
            });
        }
        self.uploads
            .lock()
            .expect("uploads lock")
            .push(ReceivedUpload {
                path,
                fields: fields.clone(),
            });
        fields
    }
}

async fn live_frame(State(mock): State<MockBackend>, multipart: Multipart) -> Json<Value> {
    mock.record("/upload_live_frame", multipart).await;
    let jitter = rand::random_range(0..20u64);
    tokio::time::sleep(Duration::from_millis(mock.frame_delay_ms + jitter)).await;
    Json(json!({
        "ingredients": [
            {"name": "tomato", "quantity": 2, "unit": "pcs", "spoiled": false},
            {"name": "lettuce", "quantity": 1, "unit": "head", "spoiled": true}
        ]
    }))
}

async fn upload_image(State(mock): State<MockBackend>, multipart: Multipart) -> Json<Value> {
    let fields = mock.record("/upload_image", multipart).await;
    let file_name = fields
        .first()
        .and_then(|f| f.file_name.clone())
        .unwrap_or_default();

    let delay = if file_name.starts_with("slow") {
        200
    } else {
        rand::random_range(0..30u64)
    };
    tokio::time::sleep(Duration::from_millis(delay)).await;

    // The analysis shape, keyed by the file name so results can be traced
    Json(json!({
        "ingredients": {
            "detected_objects": [],
            "summary": {
                file_name: {"Fresh": 1, "Spoiled": 0},
                "total_items": 1
            }
        }
    }))
}

async fn upload_video(State(mock): State<MockBackend>, multipart: Multipart) -> impl IntoResponse {
    mock.record("/upload_video", multipart).await;
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Could not decode video"})),
    )
}

async fn get_dishes() -> Json<Value> {
    Json(json!({
        "success": true,
        "dishes": [
            {"_id": "d1", "name": "Salad", "price": 9.5, "photo": "/uploads/salad.jpg",
             "ingredients": [{"name": "lettuce", "quantity": 1, "unit": "head"}]},
            {"_id": "d2", "name": "Soup", "price": 6, "photo": "https://cdn.example.com/soup.jpg"}
        ]
    }))
}

async fn add_dish(State(mock): State<MockBackend>, multipart: Multipart) -> Json<Value> {
    let fields = mock.record("/add-dish", multipart).await;
    let text = |key: &str| {
        fields
            .iter()
            .find(|f| f.name == key)
            .map(|f| String::from_utf8_lossy(&f.bytes).into_owned())
            .unwrap_or_default()
    };
    let ingredients: Value = serde_json::from_str(&text("ingredients")).unwrap_or(Value::Null);
    Json(json!({
        "success": true,
        "dish": {
            "_id": "new-dish",
            "name": text("name"),
            "price": text("price").parse::<f64>().unwrap_or_default(),
            "photo": "/uploads/new.jpg",
            "ingredients": ingredients
        }
    }))
}

async fn delete_dish(Path(id): Path<String>) -> impl IntoResponse {
    if id == "d1" {
        (StatusCode::OK, Json(json!({"success": true})))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Dish not found"})),
        )
    }
}

async fn daily_specials(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({"specials": [], "received": body}))
}

async fn upload_csv(State(mock): State<MockBackend>, multipart: Multipart) -> Json<Value> {
    let fields = mock.record("/upload_csv", multipart).await;
    let rows = json!([
        {"date": "2025-03-01", "ingredient": "rice", "consumption": 4.5, "type": "daily", "high_risk": true}
    ]);
    // Seasonal uploads also get forecast fields next to the rows
    if fields.iter().any(|f| f.name == "season") {
        Json(json!({"data": rows, "forecast_total": 31.5, "season": "summer"}))
    } else {
        Json(rows)
    }
}

async fn list_menus() -> Json<Value> {
    Json(json!({
        "success": true,
        "menus": [
            {"_id": "m1", "name": "Lunch", "description": "Weekdays",
             "dishes": [{"_id": "d1", "name": "Salad", "photo": "/uploads/salad.jpg"}]}
        ]
    }))
}

async fn create_menu(Json(body): Json<Value>) -> Json<Value> {
    let dishes: Vec<Value> = body["dishes"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|id| json!({"_id": id, "name": format!("Dish {}", id.as_str().unwrap_or_default())}))
        .collect();
    Json(json!({
        "success": true,
        "menu": {"_id": "m2", "name": body["name"], "description": body["description"], "dishes": dishes}
    }))
}

async fn delete_menu(Path(id): Path<String>) -> Json<Value> {
    if id == "m1" {
        Json(json!({"success": true}))
    } else {
        Json(json!({"success": false, "message": "Menu not found"}))
    }
}

async fn predict_ingredient(State(mock): State<MockBackend>, multipart: Multipart) -> Json<Value> {
    let fields = mock.record("/predict-ingredient", multipart).await;
    if fields.iter().any(|f| f.name == "file" && !f.bytes.is_empty()) {
        Json(json!({"success": true, "data": {"rice": {"predicted": 12.5}}, "message": "ok"}))
    } else {
        Json(json!({"success": false, "message": "No file provided"}))
    }
}

async fn get_graphs() -> Json<Value> {
    Json(json!({
        "success": true,
        "graphs": {"usage": "usage.png", "sneaky": "../sneaky.png"}
    }))
}

async fn graph_image(Path(name): Path<String>) -> impl IntoResponse {
    if name == "usage.png" {
        (StatusCode::OK, vec![0x89, b'P', b'N', b'G']).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn generate_dishes(Json(body): Json<Value>) -> Json<Value> {
    if body["type"] == "custom" && body["message"].as_str().unwrap_or_default().is_empty() {
        return Json(json!({"success": false, "message": "Please describe the dish"}));
    }
    Json(json!({
        "success": true,
        "dishes": [{"name": "Generated", "type": body["type"], "uses": body["ingredients"]}]
    }))
}

async fn analyze_image(State(mock): State<MockBackend>, multipart: Multipart) -> Json<Value> {
    mock.record("/analyze-image", multipart).await;
    Json(json!({
        "ingredients": [
            {"name": "basil", "quantity": "2", "unit": "leaves"},
            {"name": "olive oil", "quantity": null, "unit": "ml"}
        ]
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn start_mock(frame_delay_ms: u64) -> (Url, MockBackend) {
    let mock = MockBackend {
        frame_delay_ms,
        ..Default::default()
    };
    let app = Router::new()
        .route("/upload_live_frame", post(live_frame))
        .route("/upload_image", post(upload_image))
        .route("/upload_video", post(upload_video))
        .route("/get-dishes", get(get_dishes))
        .route("/add-dish", post(add_dish))
        .route("/dishes/{id}", delete(delete_dish))
        .route("/daily_specials", post(daily_specials))
        .route("/upload_csv", post(upload_csv))
        .route("/menus", get(list_menus).post(create_menu))
        .route("/menus/{id}", delete(delete_menu))
        .route("/predict-ingredient", post(predict_ingredient))
        .route("/get-graphs", get(get_graphs))
        .route("/api/graphs/{name}", get(graph_image))
        .route("/generate-dishes", post(generate_dishes))
        .route("/analyze-image", post(analyze_image))
        .route("/health", get(health))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock backend");
    });

    let base = Url::parse(&format!("http://{addr}")).expect("mock url");
    (base, mock)
}

fn client(base: &Url) -> ApiClient {
    ApiClient::new(base.clone(), Duration::from_secs(5)).expect("client")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

async fn fetch(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(get_request(uri))
        .await
        .expect("response")
}

async fn fetch_json(app: &Router, uri: &str) -> Value {
    body_json(fetch(app, uri).await).await
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&body).expect("json")
}

fn field_names(fields: &[ReceivedField]) -> Vec<&str> {
    fields.iter().map(|f| f.name.as_str()).collect()
}

fn write_png(dir: &FsPath, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(64, 48, image::Rgb([120, 60, 30]))
        .save(&path)
        .expect("write png");
    path
}

#[tokio::test]
async fn test_live_frame_is_sent_as_frame_field() {
    let (base, mock) = start_mock(0).await;
    let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

    let detection = assert_ok!(client(&base).upload_live_frame(jpeg.clone()).await);
    assert_eq!(detection.ingredients.len(), 2);
    assert_eq!(detection.totals.items, 2);
    assert_eq!(detection.totals.spoiled, 1);

    let uploads = mock.uploads_to("/upload_live_frame");
    assert_eq!(uploads.len(), 1);
    let field = &uploads[0].fields[0];
    assert_eq!(field.name, "frame");
    assert_eq!(field.file_name.as_deref(), Some("frame.jpg"));
    assert_eq!(field.bytes, jpeg);
}

#[tokio::test]
async fn test_dispatcher_never_waits_on_slow_backend() {
    let (base, mock) = start_mock(300).await;
    let renderer = ResultRenderer::new(RenderPolicy::LastResolvedWins);
    let dispatcher = UploadDispatcher::new(Arc::new(client(&base)), renderer.clone(), None);

    let started = Instant::now();
    let seqs: Vec<u64> = (0..3)
        .map(|_| dispatcher.submit_frame(vec![0xFF, 0xD8]).expect("unbounded").seq)
        .collect();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    assert!(dispatcher.drain(Duration::from_secs(5)).await);
    let stats = dispatcher.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.succeeded, 3);
    assert_eq!(mock.uploads_to("/upload_live_frame").len(), 3);

    let snapshot = renderer.snapshot().await;
    assert!(!snapshot.loading);
    assert_eq!(snapshot.resolved, 3);
    assert!(snapshot.detection.is_some());
}

#[tokio::test]
async fn test_dispatcher_failure_keeps_display() {
    // Nothing listens on the discard port
    let base = Url::parse("http://127.0.0.1:9").expect("url");
    let renderer = ResultRenderer::new(RenderPolicy::LastResolvedWins);
    let dispatcher = UploadDispatcher::new(
        Arc::new(ApiClient::new(base, Duration::from_secs(2)).expect("client")),
        renderer.clone(),
        None,
    );

    dispatcher.submit_frame(vec![1]);
    assert!(dispatcher.drain(Duration::from_secs(5)).await);

    assert_eq!(dispatcher.stats().failed, 1);
    let snapshot = renderer.snapshot().await;
    assert!(snapshot.detection.is_none());
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn test_image_batch_matches_results_by_identity() {
    let (base, mock) = start_mock(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let files = vec![
        write_png(dir.path(), "slow_a.png"),
        write_png(dir.path(), "b.png"),
        write_png(dir.path(), "c.png"),
    ];

    let batch = ImageBatch::new(Arc::new(client(&base)), PreviewRegistry::new());
    let upload = batch.add_files(&files).await;
    let ids = upload.ids.clone();
    upload.finish().await;

    let images = batch.images().await;
    assert_eq!(images.len(), 3);
    for (image, id) in images.iter().zip(&ids) {
        assert_eq!(image.id, *id);
        assert!(!image.is_analyzing);
        let detection = image.ingredients.as_ref().expect("resolved");
        assert_eq!(detection.ingredients[0].name, image.file_name);
        assert!(image.preview_url.is_some());
    }

    let uploads = mock.uploads_to("/upload_image");
    assert_eq!(uploads.len(), 3);
    assert!(uploads.iter().all(|u| u.fields[0].name == "image"));

    assert!(batch.remove(ids[1]).await);
    assert_eq!(batch.previews().len().await, 2);
}

#[tokio::test]
async fn test_backend_error_message_surfaces() {
    let (base, mock) = start_mock(0).await;
    let result = client(&base).upload_video("clip.mp4", vec![0, 0, 0, 24]).await;

    let err = assert_err!(result);
    assert!(matches!(&err, OurError::Api(message) if message.contains("Could not decode video")));

    let uploads = mock.uploads_to("/upload_video");
    assert_eq!(uploads[0].fields[0].name, "video");
    assert_eq!(uploads[0].fields[0].file_name.as_deref(), Some("clip.mp4"));
}

#[tokio::test]
async fn test_dish_crud() {
    let (base, mock) = start_mock(0).await;
    let api = client(&base);

    let dishes = assert_ok!(api.list_dishes().await);
    assert_eq!(dishes.len(), 2);
    assert_eq!(dishes[0].photo, format!("{base}uploads/salad.jpg"));
    assert_eq!(dishes[1].photo, "https://cdn.example.com/soup.jpg");
    assert!(dishes[1].ingredients.is_empty());

    let created = assert_ok!(
        api.add_dish(NewDish {
            name: "Bruschetta".to_string(),
            price: 7.25,
            ingredients: vec![Ingredient {
                name: "tomato".to_string(),
                quantity: 2.0,
                unit: "pcs".to_string(),
            }],
            photo: Some(DishPhoto::Url("https://img.example.com/b.jpg".to_string())),
        })
        .await
    );
    assert_eq!(created.id, "new-dish");
    assert_eq!(created.name, "Bruschetta");
    assert_eq!(created.price, 7.25);
    assert_eq!(created.ingredients[0].name, "tomato");

    let fields = &mock.uploads_to("/add-dish")[0].fields;
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["name", "price", "ingredients", "photo_url"]);

    assert_ok!(api.delete_dish("d1").await);
    assert_err!(api.delete_dish("missing").await);
}

#[tokio::test]
async fn test_daily_specials_payload_from_store() {
    let (base, _mock) = start_mock(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = IngredientStore::new(dir.path().join("store.json"));

    let detection = assert_ok!(client(&base).upload_live_frame(vec![0xFF, 0xD8]).await);
    assert_ok!(store.put(&detection).await);

    let stored: Detection = store
        .non_empty()
        .await
        .expect("store readable")
        .expect("stored detection");
    let summary = stored.summary();
    let reply = assert_ok!(client(&base).daily_specials(&summary).await);

    let sent = &reply["received"]["ingredients"]["summary"];
    assert_eq!(sent["tomato"]["Fresh"], 2);
    assert_eq!(sent["lettuce"]["Spoiled"], 1);
    let expected: BTreeMap<String, Value> =
        serde_json::from_value(sent.clone()).expect("summary object");
    assert_eq!(expected.len(), 2);
}

#[tokio::test]
async fn test_dashboard_api() {
    let (base, _mock) = start_mock(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        api_base_url: base,
        data_directory: dir.path().to_path_buf(),
        ..Default::default()
    };
    let state = Arc::new(AppState::new(settings).expect("state"));
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/detections")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let cache_control = response
        .headers()
        .get("Cache-Control")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cache_control.contains("no-store"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["loading"], false);
    assert_eq!(json["data"]["policy"], "last-resolved-wins");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/previews/00000000-0000-0000-0000-000000000000")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(Request::builder().uri("/scan").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert!(String::from_utf8_lossy(&body).contains("No ingredients detected."));
}

#[tokio::test]
async fn test_csv_upload_fields_and_response_shapes() {
    let (base, mock) = start_mock(0).await;
    let api = client(&base);
    let date = NaiveDate::from_ymd_opt(2025, 3, 1).expect("date");
    let csv = b"date,ingredient,consumption\n2025-03-01,rice,4.5\n".to_vec();

    let plain = assert_ok!(api.upload_csv("usage.csv", csv.clone(), date, None).await);
    assert_eq!(plain.rows().len(), 1);
    assert!(plain.forecast_fields().is_empty());

    let seasonal = assert_ok!(api.upload_csv("usage.csv", csv.clone(), date, Some("summer")).await);
    let rows = seasonal.rows();
    assert_eq!(rows[0].ingredient, "rice");
    assert_eq!(rows[0].period, "daily");
    assert!(rows[0].high_risk);
    assert_eq!(seasonal.forecast_fields()["forecast_total"], 31.5);
    assert!(!seasonal.forecast_fields().contains_key("data"));

    assert_ok!(api.upload_csv("usage.csv", csv.clone(), date, Some("")).await);

    let uploads = mock.uploads_to("/upload_csv");
    assert_eq!(uploads.len(), 3);
    assert_eq!(field_names(&uploads[0].fields), vec!["file", "date"]);
    assert_eq!(field_names(&uploads[1].fields), vec!["file", "date", "season"]);
    assert_eq!(field_names(&uploads[2].fields), vec!["file", "date"]);

    let file = &uploads[0].fields[0];
    assert_eq!(file.file_name.as_deref(), Some("usage.csv"));
    assert_eq!(file.bytes, csv);
    assert_eq!(uploads[0].fields[1].bytes, b"2025-03-01");
    assert_eq!(uploads[1].fields[2].bytes, b"summer");
}

#[tokio::test]
async fn test_menu_crud() {
    let (base, _mock) = start_mock(0).await;
    let api = client(&base);

    let menus = assert_ok!(api.list_menus().await);
    assert_eq!(menus.len(), 1);
    assert_eq!(menus[0].name, "Lunch");
    assert_eq!(menus[0].dishes[0].photo, format!("{base}uploads/salad.jpg"));

    let created = assert_ok!(
        api.create_menu(&NewMenu {
            name: "Dinner".to_string(),
            description: "Evenings".to_string(),
            dishes: vec!["d1".to_string(), "d2".to_string()],
        })
        .await
    )
    .expect("created menu echoed");
    assert_eq!(created.id, "m2");
    assert_eq!(created.description, "Evenings");
    let dish_ids: Vec<&str> = created.dishes.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(dish_ids, vec!["d1", "d2"]);

    assert_ok!(api.delete_menu("m1").await);
    let err = assert_err!(api.delete_menu("m9").await);
    assert!(matches!(&err, OurError::Api(message) if message == "Menu not found"));
}

#[tokio::test]
async fn test_forecast_and_generation_endpoints() {
    let (base, mock) = start_mock(0).await;
    let api = client(&base);

    let data = assert_ok!(api.predict_ingredient("usage.xlsx", vec![1, 2, 3]).await);
    assert_eq!(data["rice"]["predicted"], 12.5);
    let sent = &mock.uploads_to("/predict-ingredient")[0].fields[0];
    assert_eq!(sent.name, "file");
    assert_eq!(sent.file_name.as_deref(), Some("usage.xlsx"));
    let err = assert_err!(api.predict_ingredient("empty.csv", Vec::new()).await);
    assert!(matches!(&err, OurError::Api(message) if message == "No file provided"));

    let graphs = assert_ok!(api.get_graphs().await);
    assert_eq!(graphs.len(), 2);
    let saveable: Vec<&str> = graphs.values().filter_map(|f| graph_save_name(f)).collect();
    assert_eq!(saveable, vec!["usage.png"]);
    assert_eq!(assert_ok!(api.fetch_graph("usage.png").await), vec![0x89, b'P', b'N', b'G']);
    assert_err!(api.fetch_graph("missing.png").await);

    let dishes = assert_ok!(
        api.generate_dishes(&GenerateDishesRequest {
            generation_type: GenerationType::Inventory,
            message: String::new(),
            ingredients: vec!["tomato".to_string(), "basil".to_string()],
        })
        .await
    );
    assert_eq!(dishes.len(), 1);
    assert_eq!(dishes[0]["type"], "inventory");
    assert_eq!(dishes[0]["uses"], json!(["tomato", "basil"]));
    let err = assert_err!(
        api.generate_dishes(&GenerateDishesRequest {
            generation_type: GenerationType::Custom,
            message: String::new(),
            ingredients: Vec::new(),
        })
        .await
    );
    assert!(matches!(&err, OurError::Api(message) if message == "Please describe the dish"));
}

#[tokio::test]
async fn test_analyze_dish_photo_by_url_and_file() {
    let (base, mock) = start_mock(0).await;
    let api = client(&base);

    let suggested = assert_ok!(
        api.analyze_dish_photo(DishPhoto::Url("https://img.example.com/pizza.jpg".to_string()))
            .await
    );
    // The null quantity row is kept with a default
    assert_eq!(suggested.ingredients.len(), 2);
    assert_eq!(suggested.ingredients[0].quantity, 2.0);
    assert_eq!(suggested.ingredients[1].name, "olive oil");

    assert_ok!(api.analyze_dish_photo(DishPhoto::File { bytes: vec![0xFF, 0xD8] }).await);

    let uploads = mock.uploads_to("/analyze-image");
    assert_eq!(field_names(&uploads[0].fields), vec!["image_url"]);
    assert_eq!(uploads[0].fields[0].bytes, b"https://img.example.com/pizza.jpg");
    assert_eq!(field_names(&uploads[1].fields), vec!["image_file"]);
    assert_eq!(uploads[1].fields[0].file_name.as_deref(), Some("dish_photo.jpg"));
}

#[tokio::test]
async fn test_dashboard_pages_and_event_feed() {
    let (base, _mock) = start_mock(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        api_base_url: base.clone(),
        data_directory: dir.path().to_path_buf(),
        ..Default::default()
    };
    let state = Arc::new(AppState::new(settings).expect("state"));
    let app = build_router(state.clone());

    let json = fetch_json(&app, "/api/ingredients").await;
    assert_eq!(json["success"], true);
    assert!(json["data"].is_null());

    let detection = assert_ok!(client(&base).upload_live_frame(vec![0xFF, 0xD8]).await);
    assert_ok!(state.store.put(&detection).await);
    let json = fetch_json(&app, "/api/ingredients").await;
    assert_eq!(json["data"]["detection"]["ingredients"][0]["name"], "tomato");

    let response = fetch(&app, "/dishes").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let page = String::from_utf8_lossy(&body);
    assert!(page.contains("Salad"));
    assert!(page.contains(&format!("{base}uploads/salad.jpg")));

    let response = fetch(&app, "/api/events").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
    let mut events = response.into_body().into_data_stream();

    state.renderer.begin(7).await;
    assert!(state.renderer.resolve(7, Ok(detection)).await);

    let seen = tokio::time::timeout(Duration::from_secs(2), async {
        let mut seen = String::new();
        while let Some(Ok(chunk)) = events.next().await {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains("event: updated") {
                break;
            }
        }
        seen
    })
    .await
    .expect("updated event");
    assert!(seen.contains("event: pending"));
    assert!(seen.contains("event: updated"));
    assert!(seen.contains("\"seq\":7"));
    assert!(seen.contains("lettuce"));
}

#[tokio::test]
async fn test_dashboard_image_batch_registers_previews() {
    let (base, mock) = start_mock(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        api_base_url: base,
        data_directory: dir.path().to_path_buf(),
        ..Default::default()
    };
    let state = Arc::new(AppState::new(settings).expect("state"));
    let app = build_router(state.clone());

    let png = std::fs::read(write_png(dir.path(), "leek.png")).expect("png");
    let boundary = "kitchen-scanner-boundary";
    let mut body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"image\"; filename=\"leek.png\"\r\n\
         Content-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/images")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let id = json["data"][0].as_str().expect("image id").to_string();

    let image = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let json = fetch_json(&app, &format!("/api/images/{id}")).await;
            if json["data"]["is_analyzing"] == false {
                break json["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("image analysed");
    assert_eq!(image["file_name"], "leek.png");
    assert_eq!(image["ingredients"]["ingredients"][0]["name"], "leek.png");
    assert_eq!(mock.uploads_to("/upload_image")[0].fields[0].name, "image");

    let preview_id = parse_preview_url(image["preview_url"].as_str().expect("preview url"))
        .expect("preview id");
    let preview_uri = format!("/previews/{preview_id}");
    let response = fetch(&app, &preview_uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("image/jpeg")
    );

    let status = fetch_json(&app, "/api/status").await;
    assert_eq!(status["data"]["previews"], 1);
    assert_eq!(status["data"]["backend_online"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/images/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = fetch(&app, &preview_uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let listing = fetch_json(&app, "/api/images").await;
    assert_eq!(listing["data"], json!([]));
}
