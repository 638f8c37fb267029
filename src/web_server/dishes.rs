use super::prelude::*;

pub(crate) struct DishRow {
    name: String,
    price: String,
    ingredients: String,
    photo: String,
}

#[derive(Template, WebTemplate)]
#[template(path = "dishes.html")]
pub(crate) struct DishesTemplate {
    dishes: Vec<DishRow>,
    error: Option<String>,
}

/// Dish table mirrored from the backend
pub(crate) async fn dishes_page(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    let template = match state.api.list_dishes().await {
        Ok(dishes) => DishesTemplate {
            dishes: dishes
                .into_iter()
                .map(|dish| DishRow {
                    photo: dish.photo.clone(),
                    price: format!("{:.2}", dish.price),
                    ingredients: dish
                        .ingredients
                        .iter()
                        .map(|i| i.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    name: dish.name,
                })
                .collect(),
            error: None,
        },
        Err(e) => {
            warn!("Failed to fetch dishes: {e}");
            DishesTemplate {
                dishes: Vec::new(),
                error: Some("Failed to load dishes".to_string()),
            }
        }
    };

    template.render().map(Html::from).map_err(|e| {
        error!("Failed to render dishes template: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
        )
    })
}
