//! HTTP client for the restaurant backend.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use super::DetectionService;
use super::types::{
    CsvUploadResponse, Detection, DetectionEnvelope, Dish, DishPhoto, DishesReply,
    GenerateDishesRequest, GraphsReply, Menu, MenusReply, NewDish, NewMenu, ServiceReply,
    StatusCounts,
};
use crate::config::Settings;
use crate::constants::{
    DISH_PHOTO_FILENAME, FIELD_FILE, FIELD_FRAME, FIELD_IMAGE, FIELD_VIDEO, FRAME_FILENAME,
};
use crate::{OurError, OurResult};

/// Thin typed wrapper over the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
}

/// Best-effort content type from a file name
pub(crate) fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "csv" => "text/csv",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

/// The graph file name when it names a plain file, `None` for anything that
/// would leave the save directory (absolute paths, `..`, nested paths)
pub fn graph_save_name(graph_file: &str) -> Option<&str> {
    let name = std::path::Path::new(graph_file).file_name()?.to_str()?;
    (name == graph_file).then_some(name)
}

fn file_part(bytes: Vec<u8>, file_name: &str) -> OurResult<Part> {
    Ok(Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(mime_for(file_name))?)
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> OurResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn from_settings(settings: &Settings) -> OurResult<Self> {
        Self::new(
            settings.api_base_url.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> OurResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Photo paths from the backend may be relative to the base URL
    pub fn resolve_photo(&self, photo: &str) -> String {
        if photo.is_empty() || photo.starts_with("http://") || photo.starts_with("https://") {
            return photo.to_string();
        }
        match self.base_url.join(photo) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!("Could not resolve photo path {photo}: {e}");
                photo.to_string()
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> OurResult<T> {
        let status = response.status();
        let url = response.url().clone();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(OurError::Api(format!(
                "{url} returned {status}: {message}"
            )));
        }

        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> OurResult<T> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url).send().await?;
        self.read_json(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> OurResult<T> {
        let url = self.endpoint(path)?;
        let response = self.client.post(url).json(body).send().await?;
        self.read_json(response).await
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: Form) -> OurResult<T> {
        let url = self.endpoint(path)?;
        let response = self.client.post(url).multipart(form).send().await?;
        self.read_json(response).await
    }

    async fn post_detection(&self, path: &str, form: Form) -> OurResult<Detection> {
        let envelope: DetectionEnvelope = self.post_form(path, form).await?;
        match (envelope.ingredients, envelope.error) {
            (None, Some(error)) => Err(OurError::Api(error)),
            (ingredients, _) => Ok(Detection::from_wire(ingredients)),
        }
    }

    /// `POST /upload_image` with field `image`
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> OurResult<Detection> {
        let form = Form::new().part(FIELD_IMAGE, file_part(bytes, file_name)?);
        self.post_detection("/upload_image", form).await
    }

    /// `POST /upload_live_frame` with field `frame`
    pub async fn upload_live_frame(&self, jpeg: Vec<u8>) -> OurResult<Detection> {
        let form = Form::new().part(FIELD_FRAME, file_part(jpeg, FRAME_FILENAME)?);
        self.post_detection("/upload_live_frame", form).await
    }

    /// `POST /upload_video` with field `video`
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn upload_video(&self, file_name: &str, bytes: Vec<u8>) -> OurResult<Detection> {
        let form = Form::new().part(FIELD_VIDEO, file_part(bytes, file_name)?);
        self.post_detection("/upload_video", form).await
    }

    /// `POST /analyze-image`: ingredient suggestions for a dish photo
    pub async fn analyze_dish_photo(&self, photo: DishPhoto) -> OurResult<Detection> {
        let form = match photo {
            DishPhoto::Url(url) => Form::new().text("image_url", url),
            DishPhoto::File { bytes } => {
                Form::new().part("image_file", file_part(bytes, DISH_PHOTO_FILENAME)?)
            }
        };
        self.post_detection("/analyze-image", form).await
    }

    /// `POST /upload_csv` with `file`, `date` and optional `season`
    pub async fn upload_csv(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        date: NaiveDate,
        season: Option<&str>,
    ) -> OurResult<CsvUploadResponse> {
        let mut form = Form::new()
            .part(FIELD_FILE, file_part(bytes, file_name)?)
            .text("date", date.format("%Y-%m-%d").to_string());
        if let Some(season) = season.filter(|s| !s.is_empty()) {
            form = form.text("season", season.to_string());
        }
        self.post_form("/upload_csv", form).await
    }

    /// `POST /predict-ingredient`; returns the `data` object as-is
    pub async fn predict_ingredient(&self, file_name: &str, bytes: Vec<u8>) -> OurResult<Value> {
        let form = Form::new().part(FIELD_FILE, file_part(bytes, file_name)?);
        let reply: ServiceReply<Value> = self.post_form("/predict-ingredient", form).await?;
        if !reply.success {
            return Err(OurError::Api(
                reply
                    .message
                    .or(reply.error)
                    .unwrap_or_else(|| "Failed to process file".to_string()),
            ));
        }
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// `GET /get-graphs`: graph name to file name
    pub async fn get_graphs(&self) -> OurResult<BTreeMap<String, String>> {
        let reply: GraphsReply = self.get_json("/get-graphs").await?;
        if !reply.success {
            warn!("Graph listing reported failure");
        }
        Ok(reply.graphs)
    }

    /// `GET /api/graphs/{name}`: raw image bytes
    pub async fn fetch_graph(&self, name: &str) -> OurResult<Vec<u8>> {
        let url = self.endpoint(&format!("/api/graphs/{name}"))?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OurError::Api(format!(
                "Graph '{name}' request failed with status: {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// `GET /get-dishes`, with photo paths made absolute
    pub async fn list_dishes(&self) -> OurResult<Vec<Dish>> {
        let reply: DishesReply = self.get_json("/get-dishes").await?;
        if !reply.success {
            warn!(
                "Dish listing reported failure: {}",
                reply.message.unwrap_or_default()
            );
        }
        Ok(reply
            .dishes
            .into_iter()
            .map(|mut dish| {
                dish.photo = self.resolve_photo(&dish.photo);
                dish
            })
            .collect())
    }

    /// `POST /add-dish` as multipart form
    pub async fn add_dish(&self, dish: NewDish) -> OurResult<Dish> {
        let mut form = Form::new()
            .text("name", dish.name)
            .text("price", dish.price.to_string())
            .text("ingredients", serde_json::to_string(&dish.ingredients)?);
        form = match dish.photo {
            Some(DishPhoto::Url(url)) => form.text("photo_url", url),
            Some(DishPhoto::File { bytes }) => {
                form.part("photo_file", file_part(bytes, DISH_PHOTO_FILENAME)?)
            }
            None => form,
        };

        let reply: DishesReply = self.post_form("/add-dish", form).await?;
        match reply.dish {
            Some(mut created) if reply.success => {
                created.photo = self.resolve_photo(&created.photo);
                Ok(created)
            }
            _ => Err(OurError::Api(
                reply
                    .message
                    .unwrap_or_else(|| "Backend did not return the new dish".to_string()),
            )),
        }
    }

    /// `DELETE /dishes/{id}`
    pub async fn delete_dish(&self, dish_id: &str) -> OurResult<()> {
        let url = self.endpoint(&format!("/dishes/{dish_id}"))?;
        let response = self.client.delete(url).send().await?;
        let reply: DishesReply = self.read_json(response).await?;
        if reply.success {
            Ok(())
        } else {
            Err(OurError::Api(reply.message.unwrap_or_else(|| {
                format!("Failed to delete dish {dish_id}")
            })))
        }
    }

    /// `GET /menus`
    pub async fn list_menus(&self) -> OurResult<Vec<Menu>> {
        let reply: MenusReply = self.get_json("/menus").await?;
        if !reply.success {
            warn!(
                "Menu listing reported failure: {}",
                reply.message.unwrap_or_default()
            );
        }
        Ok(reply
            .menus
            .into_iter()
            .map(|mut menu| {
                for dish in &mut menu.dishes {
                    dish.photo = self.resolve_photo(&dish.photo);
                }
                menu
            })
            .collect())
    }

    /// `POST /menus`; the created menu when the backend echoes it
    pub async fn create_menu(&self, menu: &NewMenu) -> OurResult<Option<Menu>> {
        let reply: MenusReply = self.post_json("/menus", menu).await?;
        if reply.success {
            Ok(reply.menu)
        } else {
            Err(OurError::Api(
                reply
                    .message
                    .unwrap_or_else(|| "Failed to create menu".to_string()),
            ))
        }
    }

    /// `DELETE /menus/{id}`
    pub async fn delete_menu(&self, menu_id: &str) -> OurResult<()> {
        let url = self.endpoint(&format!("/menus/{menu_id}"))?;
        let response = self.client.delete(url).send().await?;
        let reply: MenusReply = self.read_json(response).await?;
        if reply.success {
            Ok(())
        } else {
            Err(OurError::Api(reply.message.unwrap_or_else(|| {
                format!("Failed to delete menu {menu_id}")
            })))
        }
    }

    /// `POST /optimize-menu`
    pub async fn optimize_menu(&self, request: &Value) -> OurResult<Value> {
        self.post_json("/optimize-menu", request).await
    }

    /// `POST /optimize-cost`
    pub async fn optimize_cost(&self, request: &Value) -> OurResult<Value> {
        self.post_json("/optimize-cost", request).await
    }

    /// `POST /generate-dishes`; dishes are rendered as-is
    pub async fn generate_dishes(&self, request: &GenerateDishesRequest) -> OurResult<Vec<Value>> {
        let reply: Value = self.post_json("/generate-dishes", request).await?;
        let success = reply
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !success {
            return Err(OurError::Api(
                reply
                    .get("message")
                    .or_else(|| reply.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("Dish generation failed")
                    .to_string(),
            ));
        }
        Ok(reply
            .get("dishes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// `POST /daily_specials` built from a per-ingredient summary
    pub async fn daily_specials(
        &self,
        summary: &BTreeMap<String, StatusCounts>,
    ) -> OurResult<Value> {
        let body = json!({ "ingredients": { "summary": summary } });
        self.post_json("/daily_specials", &body).await
    }

    /// `GET /health`
    pub async fn health(&self) -> OurResult<bool> {
        let reply: Value = self.get_json("/health").await?;
        Ok(reply.get("status").and_then(Value::as_str) == Some("ok"))
    }
}

impl DetectionService for ApiClient {
    async fn detect_frame(&self, jpeg: Vec<u8>) -> OurResult<Detection> {
        self.upload_live_frame(jpeg).await
    }

    async fn detect_image(&self, file_name: String, bytes: Vec<u8>) -> OurResult<Detection> {
        self.upload_image(&file_name, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new(
            Url::parse("http://localhost:8080").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("frame.jpg"), "image/jpeg");
        assert_eq!(mime_for("Clip.MOV"), "video/quicktime");
        assert_eq!(mime_for("usage.csv"), "text/csv");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_resolve_photo() {
        let client = client();
        assert_eq!(
            client.resolve_photo("/uploads/pasta.jpg"),
            "http://localhost:8080/uploads/pasta.jpg"
        );
        assert_eq!(
            client.resolve_photo("https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(client.resolve_photo(""), "");
    }

    #[test]
    fn test_graph_save_name_rejects_paths() {
        assert_eq!(graph_save_name("weekly_usage.png"), Some("weekly_usage.png"));
        assert_eq!(graph_save_name("/home/u/.bashrc"), None);
        assert_eq!(graph_save_name("../escape.png"), None);
        assert_eq!(graph_save_name("nested/graph.png"), None);
        assert_eq!(graph_save_name(".."), None);
        assert_eq!(graph_save_name(""), None);
    }
}
