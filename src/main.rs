use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use kitchen_scanner::api::ApiClient;
use kitchen_scanner::api::client::graph_save_name;
use kitchen_scanner::api::types::{
    DishPhoto, GenerateDishesRequest, GenerationType, Ingredient, NewDish, NewMenu,
};
use kitchen_scanner::camera_manager::{CameraAcquirer, NokhwaBackend, open_camera};
use kitchen_scanner::config::{Settings, UserConfig};
use kitchen_scanner::dispatcher::UploadDispatcher;
use kitchen_scanner::frame_sampler::FrameSampler;
use kitchen_scanner::image_batch::{ImageBatch, PreviewRegistry};
use kitchen_scanner::ingredient_store::IngredientStore;
use kitchen_scanner::live_scan::{persist_updates, run_live_scan};
use kitchen_scanner::protocol::ScanEvent;
use kitchen_scanner::renderer::{ResultRenderer, render_table};
use kitchen_scanner::server;
use kitchen_scanner::video_walker::{FrameSequence, VideoWalker};
use kitchen_scanner::{OurError, OurResult};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "kitchen-scanner")]
#[command(about = "Ingredient scanning and menu tools for a restaurant backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List video input devices
    Cameras,
    /// Detect ingredients from a camera, images or video
    Scan {
        #[command(subcommand)]
        action: ScanAction,
    },
    /// Dish management
    Dishes {
        #[command(subcommand)]
        action: DishAction,
    },
    /// Menu management
    Menus {
        #[command(subcommand)]
        action: MenuAction,
    },
    /// Demand forecasting
    Demand {
        #[command(subcommand)]
        action: DemandAction,
    },
    /// Cost optimisation
    Optimize {
        #[command(subcommand)]
        action: OptimizeAction,
    },
    /// Daily specials from the last detected ingredients
    Specials,
    /// Generate dish ideas
    GenerateDishes {
        #[arg(long, value_enum, default_value = "inventory")]
        mode: GenerationMode,
        /// Free-text request, used in custom mode
        #[arg(long, default_value = "")]
        message: String,
        /// Ingredients to cook with; defaults to the last detection
        #[arg(long = "ingredient")]
        ingredients: Vec<String>,
    },
    /// The shared detected-ingredients store
    Ingredients {
        #[command(subcommand)]
        action: IngredientsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start the local dashboard
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
        /// Camera to scan from while serving
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum ScanAction {
    /// Capture from a camera on a fixed interval
    Live {
        #[arg(long)]
        device: Option<String>,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Analyse one or more image files
    Images {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Walk an animated GIF or a directory of frames
    Video {
        path: PathBuf,
        /// Frame rate for directories of stills
        #[arg(long, default_value_t = 1.0)]
        fps: f64,
    },
    /// Upload a whole video file for server-side analysis
    UploadVideo { file: PathBuf },
}

#[derive(Subcommand)]
enum DishAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
        /// `name[:quantity[:unit]]`, repeatable
        #[arg(long = "ingredient")]
        ingredients: Vec<String>,
        #[arg(long, conflicts_with = "photo_url")]
        photo_file: Option<PathBuf>,
        #[arg(long)]
        photo_url: Option<String>,
    },
    Delete { id: String },
    /// Suggest ingredients for a dish photo
    AnalyzePhoto {
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum MenuAction {
    List,
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Dish id, repeatable
        #[arg(long = "dish")]
        dishes: Vec<String>,
    },
    Delete { id: String },
    /// Send a JSON request body to the menu optimiser
    Optimize {
        #[arg(long)]
        request: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DemandAction {
    /// Upload a consumption CSV
    UploadCsv {
        file: PathBuf,
        #[arg(long)]
        season: Option<String>,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Upload a file for ingredient demand prediction
    Predict { file: PathBuf },
    /// List forecast graphs, optionally saving them
    Graphs {
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum OptimizeAction {
    /// Send a JSON request body to the cost optimiser
    Cost {
        #[arg(long)]
        request: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum IngredientsAction {
    Show,
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration
    Show,
    /// Remember a camera for later scans
    SelectCamera { id: String },
    /// Reset saved choices to defaults
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum GenerationMode {
    Inventory,
    Custom,
}

#[tokio::main]
async fn main() -> OurResult<()> {
    let cli = Cli::parse();

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let log_level = if cli.debug || settings.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase())),
        )
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    debug!("Using backend at {}", settings.api_base_url);

    match cli.command {
        Commands::Cameras => list_cameras(&settings),
        Commands::Scan { action } => handle_scan_command(action, &settings).await,
        Commands::Dishes { action } => handle_dish_command(action, &settings).await,
        Commands::Menus { action } => handle_menu_command(action, &settings).await,
        Commands::Demand { action } => handle_demand_command(action, &settings).await,
        Commands::Optimize {
            action: OptimizeAction::Cost { request },
        } => {
            let api = ApiClient::from_settings(&settings)?;
            let body = read_request_body(request.as_deref()).await?;
            print_json(&api.optimize_cost(&body).await?)
        }
        Commands::Specials => daily_specials(&settings).await,
        Commands::GenerateDishes {
            mode,
            message,
            ingredients,
        } => generate_dishes(&settings, mode, message, ingredients).await,
        Commands::Ingredients { action } => handle_ingredients_command(action, &settings).await,
        Commands::Config { action } => handle_config_command(action, &settings),
        Commands::Serve { host, port, device } => {
            let host = host.unwrap_or_else(|| settings.host.clone());
            let port = port.unwrap_or(settings.port);
            let device = device.or_else(|| Settings::load_user_config().selected_camera);
            server::serve(settings, host, port, device).await
        }
    }
}

fn list_cameras(settings: &Settings) -> OurResult<()> {
    let acquirer = CameraAcquirer::new(NokhwaBackend, settings.camera_resolution);
    let cameras = acquirer.list_cameras();
    if cameras.is_empty() {
        println!("No cameras found");
    }
    let selected = Settings::load_user_config().selected_camera;
    for camera in cameras {
        let marker = if selected.as_deref() == Some(camera.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}  {}  {}", camera.id, camera.name, camera.description);
    }
    Ok(())
}

/// Flip the returned channel on Ctrl-C or after `seconds`
fn shutdown_signal(seconds: Option<u64>) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match seconds {
            Some(seconds) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = tokio::time::sleep(Duration::from_secs(seconds)) => {},
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        let _ = tx.send(true);
    });
    rx
}

/// Print the table every time the display changes
fn print_updates(renderer: &ResultRenderer) -> tokio::task::JoinHandle<()> {
    let mut events = renderer.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ScanEvent::Updated { seq, detection }) => {
                    println!("\nFrame {seq}:\n{}", render_table(&detection));
                }
                Ok(ScanEvent::Failed { seq, message }) => {
                    println!("Frame {seq} failed: {message}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => debug!("Printer skipped {missed} events"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_scan_command(action: ScanAction, settings: &Settings) -> OurResult<()> {
    let api = Arc::new(ApiClient::from_settings(settings)?);
    let store = IngredientStore::new(settings.ingredient_store_path());
    let drain_limit = Duration::from_secs(settings.request_timeout_secs + 1);

    match action {
        ScanAction::Live { device, seconds } => {
            let device = match device.or_else(|| Settings::load_user_config().selected_camera) {
                Some(device) => device,
                None => CameraAcquirer::new(NokhwaBackend, settings.camera_resolution)
                    .list_cameras()
                    .into_iter()
                    .next()
                    .map(|camera| camera.id)
                    .ok_or_else(|| OurError::Camera("No cameras found".to_string()))?,
            };

            let renderer = ResultRenderer::new(settings.render_policy);
            let dispatcher = UploadDispatcher::new(api, renderer.clone(), settings.max_in_flight);
            let printer = print_updates(&renderer);
            let writer = persist_updates(renderer.subscribe(), store);

            let acquirer = open_camera(device, settings.camera_resolution).await?;
            let stream = acquirer
                .stream()
                .ok_or_else(|| OurError::Camera("Camera stream closed".to_string()))?;
            let sampler = FrameSampler::new(settings.jpeg_quality);
            let stats = run_live_scan(
                stream,
                &sampler,
                &dispatcher,
                Duration::from_millis(settings.capture_interval_ms),
                shutdown_signal(seconds),
            )
            .await;
            drop(acquirer);

            if !dispatcher.drain(drain_limit).await {
                warn!("Some uploads were still pending at exit");
            }
            println!(
                "{} ticks, {} frames sent, {} skipped, {} dropped",
                stats.ticks, stats.submitted, stats.skipped, stats.dropped
            );
            drop(dispatcher);
            drop(renderer);
            let _ = printer.await;
            let _ = writer.await;
            Ok(())
        }
        ScanAction::Images { files } => {
            let batch = ImageBatch::new(api, PreviewRegistry::new());
            batch.add_files(&files).await.finish().await;

            for image in batch.images().await {
                println!("== {}", image.file_name);
                match (&image.ingredients, &image.error) {
                    (_, Some(error)) => println!("{error}\n"),
                    (Some(detection), None) => println!("{}", render_table(detection)),
                    (None, None) => println!("Analyzing...\n"),
                }
            }

            let merged = batch.merged().await;
            if !merged.is_empty() {
                store.put(&merged).await?;
            }
            Ok(())
        }
        ScanAction::Video { path, fps } => {
            let video = FrameSequence::open(&path, fps)?;
            let renderer = ResultRenderer::new(settings.render_policy);
            let dispatcher = UploadDispatcher::new(api, renderer.clone(), settings.max_in_flight);
            let printer = print_updates(&renderer);
            let writer = persist_updates(renderer.subscribe(), store);

            let mut walker = VideoWalker::new(video, settings.video_step_secs);
            let mut progress = walker.progress();
            let reporter = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let percent = *progress.borrow_and_update();
                    info!("Processing video: {percent:.0}%");
                }
            });

            let sampler = FrameSampler::new(settings.jpeg_quality);
            let state = walker
                .run(&sampler, &dispatcher, shutdown_signal(None))
                .await?;
            debug!("Walker finished in state {state:?}");
            drop(walker);
            let _ = reporter.await;

            if !dispatcher.drain(drain_limit).await {
                warn!("Some uploads were still pending at exit");
            }
            drop(dispatcher);
            drop(renderer);
            let _ = printer.await;
            let _ = writer.await;
            Ok(())
        }
        ScanAction::UploadVideo { file } => {
            let bytes = tokio::fs::read(&file).await?;
            let detection = api.upload_video(&file_name(&file), bytes).await?;
            println!("{}", render_table(&detection));
            if !detection.is_empty() {
                store.put(&detection).await?;
            }
            Ok(())
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `name[:quantity[:unit]]`
fn parse_ingredient(text: &str) -> OurResult<Ingredient> {
    let mut parts = text.splitn(3, ':');
    let name = parts.next().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        return Err(OurError::App(format!("Ingredient '{text}' has no name")));
    }
    let quantity = match parts.next() {
        Some(q) => q
            .trim()
            .parse()
            .map_err(|e| OurError::App(format!("Bad quantity in '{text}': {e}")))?,
        None => 1.0,
    };
    let unit = parts.next().unwrap_or("").trim().to_string();
    Ok(Ingredient {
        name,
        quantity,
        unit,
    })
}

async fn handle_dish_command(action: DishAction, settings: &Settings) -> OurResult<()> {
    let api = ApiClient::from_settings(settings)?;
    match action {
        DishAction::List => {
            let dishes = api.list_dishes().await?;
            if dishes.is_empty() {
                println!("No dishes yet");
            }
            for dish in dishes {
                let ingredients: Vec<&str> =
                    dish.ingredients.iter().map(|i| i.name.as_str()).collect();
                println!(
                    "{}  {}  ${:.2}  [{}]  {}",
                    dish.id,
                    dish.name,
                    dish.price,
                    ingredients.join(", "),
                    dish.photo
                );
            }
            Ok(())
        }
        DishAction::Add {
            name,
            price,
            ingredients,
            photo_file,
            photo_url,
        } => {
            let ingredients = ingredients
                .iter()
                .map(|item| parse_ingredient(item))
                .collect::<OurResult<Vec<_>>>()?;
            let photo = match (photo_file, photo_url) {
                (Some(path), _) => Some(DishPhoto::File {
                    bytes: tokio::fs::read(&path).await?,
                }),
                (None, Some(url)) => Some(DishPhoto::Url(url)),
                (None, None) => None,
            };
            let dish = api
                .add_dish(NewDish {
                    name,
                    price,
                    ingredients,
                    photo,
                })
                .await?;
            println!("Added dish {} ({})", dish.name, dish.id);
            Ok(())
        }
        DishAction::Delete { id } => {
            api.delete_dish(&id).await?;
            println!("Deleted dish {id}");
            Ok(())
        }
        DishAction::AnalyzePhoto { file, url } => {
            let photo = match (file, url) {
                (Some(path), _) => DishPhoto::File {
                    bytes: tokio::fs::read(&path).await?,
                },
                (None, Some(url)) => DishPhoto::Url(url),
                (None, None) => {
                    return Err(OurError::App("Give --file or --url".to_string()));
                }
            };
            let detection = api.analyze_dish_photo(photo).await?;
            println!("{}", render_table(&detection));
            Ok(())
        }
    }
}

async fn handle_menu_command(action: MenuAction, settings: &Settings) -> OurResult<()> {
    let api = ApiClient::from_settings(settings)?;
    match action {
        MenuAction::List => {
            let menus = api.list_menus().await?;
            if menus.is_empty() {
                println!("No menus yet");
            }
            for menu in menus {
                println!("{}  {}  {}", menu.id, menu.name, menu.description);
                for dish in &menu.dishes {
                    println!("    - {} (${:.2})", dish.name, dish.price);
                }
            }
            Ok(())
        }
        MenuAction::Create {
            name,
            description,
            dishes,
        } => {
            let created = api
                .create_menu(&NewMenu {
                    name: name.clone(),
                    description,
                    dishes,
                })
                .await?;
            match created {
                Some(menu) => println!("Created menu {} ({})", menu.name, menu.id),
                None => println!("Created menu {name}"),
            }
            Ok(())
        }
        MenuAction::Delete { id } => {
            api.delete_menu(&id).await?;
            println!("Deleted menu {id}");
            Ok(())
        }
        MenuAction::Optimize { request } => {
            let body = read_request_body(request.as_deref()).await?;
            print_json(&api.optimize_menu(&body).await?)
        }
    }
}

async fn handle_demand_command(action: DemandAction, settings: &Settings) -> OurResult<()> {
    let api = ApiClient::from_settings(settings)?;
    match action {
        DemandAction::UploadCsv { file, season, date } => {
            let mut user_config = Settings::load_user_config();
            let season = season.or_else(|| user_config.last_season.clone());
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let bytes = tokio::fs::read(&file).await?;

            let response = api
                .upload_csv(&file_name(&file), bytes, date, season.as_deref())
                .await?;

            let rows = response.rows();
            if !rows.is_empty() {
                println!(
                    "{:<12}  {:<20}  {:>12}  {:<8}  Risk",
                    "Date", "Ingredient", "Consumption", "Type"
                );
                for row in rows {
                    println!(
                        "{:<12}  {:<20}  {:>12.2}  {:<8}  {}",
                        row.date,
                        row.ingredient,
                        row.consumption,
                        row.period,
                        if row.high_risk { "HIGH" } else { "" }
                    );
                }
            }
            let fields = response.forecast_fields();
            if !fields.is_empty() {
                print_json(&Value::Object(fields))?;
            }

            if season.is_some() && season != user_config.last_season {
                user_config.last_season = season;
                Settings::save_user_config(&user_config)?;
            }
            Ok(())
        }
        DemandAction::Predict { file } => {
            let bytes = tokio::fs::read(&file).await?;
            print_json(&api.predict_ingredient(&file_name(&file), bytes).await?)
        }
        DemandAction::Graphs { save } => {
            let graphs = api.get_graphs().await?;
            if graphs.is_empty() {
                println!("No graphs available");
            }
            for (name, graph_file) in &graphs {
                println!("{name}: {graph_file}");
                if let Some(dir) = &save {
                    let Some(save_name) = graph_save_name(graph_file) else {
                        warn!("Not saving graph {name}: unsafe file name {graph_file:?}");
                        continue;
                    };
                    tokio::fs::create_dir_all(dir).await?;
                    let bytes = api.fetch_graph(graph_file).await?;
                    let target = dir.join(save_name);
                    tokio::fs::write(&target, bytes).await?;
                    info!("Saved {}", target.display());
                }
            }
            Ok(())
        }
    }
}

async fn daily_specials(settings: &Settings) -> OurResult<()> {
    let store = IngredientStore::new(settings.ingredient_store_path());
    let Some(detection) = store.non_empty().await? else {
        println!("No detected ingredients yet. Run a scan first.");
        return Ok(());
    };
    let api = ApiClient::from_settings(settings)?;
    print_json(&api.daily_specials(&detection.summary()).await?)
}

async fn generate_dishes(
    settings: &Settings,
    mode: GenerationMode,
    message: String,
    mut ingredients: Vec<String>,
) -> OurResult<()> {
    if ingredients.is_empty() {
        let store = IngredientStore::new(settings.ingredient_store_path());
        if let Some(detection) = store.non_empty().await? {
            ingredients = detection.ingredients.into_iter().map(|i| i.name).collect();
        }
    }
    let request = GenerateDishesRequest {
        generation_type: match mode {
            GenerationMode::Inventory => GenerationType::Inventory,
            GenerationMode::Custom => GenerationType::Custom,
        },
        message,
        ingredients,
    };

    let api = ApiClient::from_settings(settings)?;
    for dish in api.generate_dishes(&request).await? {
        print_json(&dish)?;
    }
    Ok(())
}

async fn handle_ingredients_command(
    action: IngredientsAction,
    settings: &Settings,
) -> OurResult<()> {
    let store = IngredientStore::new(settings.ingredient_store_path());
    match action {
        IngredientsAction::Show => {
            match store.get().await? {
                Some(stored) => {
                    println!("Detected at {}", stored.updated_at.with_timezone(&Local));
                    println!("{}", render_table(&stored.detection));
                }
                None => println!("No detected ingredients yet"),
            }
            Ok(())
        }
        IngredientsAction::Clear => store.clear().await,
    }
}

fn handle_config_command(action: ConfigAction, settings: &Settings) -> OurResult<()> {
    match action {
        ConfigAction::Show => {
            let user_config = Settings::load_user_config();
            println!("Configuration:");
            println!("  Backend: {}", settings.api_base_url);
            println!("  Dashboard: {}:{}", settings.host, settings.port);
            println!("  Debug: {}", settings.debug);
            println!("  Request timeout: {}s", settings.request_timeout_secs);
            println!("  Capture interval: {}ms", settings.capture_interval_ms);
            println!("  JPEG quality: {}", settings.jpeg_quality);
            println!("  Camera resolution: {}", settings.camera_resolution);
            println!(
                "  Max in flight: {}",
                settings
                    .max_in_flight
                    .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
            );
            println!("  Render policy: {:?}", settings.render_policy);
            println!("  Video step: {}s", settings.video_step_secs);
            println!("  Data directory: {}", settings.data_directory.display());
            println!("  Config file: {}", Settings::get_config_path().display());
            println!(
                "  Selected camera: {}",
                user_config.selected_camera.as_deref().unwrap_or("none")
            );
            println!(
                "  Last season: {}",
                user_config.last_season.as_deref().unwrap_or("none")
            );
            Ok(())
        }
        ConfigAction::SelectCamera { id } => {
            let mut user_config = Settings::load_user_config();
            user_config.selected_camera = Some(id.clone());
            Settings::save_user_config(&user_config)?;
            println!("Selected camera {id}");
            Ok(())
        }
        ConfigAction::Reset => {
            Settings::save_user_config(&UserConfig::default())?;
            println!("Configuration reset");
            Ok(())
        }
    }
}

async fn read_request_body(path: Option<&Path>) -> OurResult<Value> {
    match path {
        Some(path) => Ok(serde_json::from_slice(&tokio::fs::read(path).await?)?),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

fn print_json(value: &Value) -> OurResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
