//! Default kitchen deployment: refrigerator and recipe specialists

use super::{ActionRegistry, BackendClient, BodyShape, HttpAction, HttpMethod};
use crate::registry::{AssistantSpec, PrimarySpec};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const REFRIGERATOR_ASSISTANT: &str = "refrigerator";
pub const RECIPE_ASSISTANT: &str = "recipe";

/// (name, type, description, required)
type Field = (&'static str, &'static str, &'static str, bool);

struct Endpoint {
    name: &'static str,
    description: &'static str,
    method: HttpMethod,
    path: &'static str,
    fields: &'static [Field],
    body: Option<BodyShape>,
}

const FRIDGE_ID: Field = ("refrigerator_id", "integer", "Refrigerator ID", true);
const CATEGORY_ID: Field = ("category_id", "integer", "Category ID", true);
const INGREDIENT_ID: Field = ("ingredient_id", "integer", "Ingredient ID", true);
const RECIPE_ID: Field = ("recipe_id", "integer", "Recipe ID", true);

const DEFAULT_CATEGORY_ICON: &str = "📦";

const REFRIGERATOR_SAFE: &[Endpoint] = &[
    Endpoint {
        name: "get_refrigerators",
        description: "List every refrigerator the user belongs to.",
        method: HttpMethod::Get,
        path: "/api/refrigerators",
        fields: &[],
        body: None,
    },
    Endpoint {
        name: "get_refrigerator_details",
        description: "Show one refrigerator with its categories and ingredients.",
        method: HttpMethod::Get,
        path: "/api/refrigerators/{refrigerator_id}",
        fields: &[FRIDGE_ID],
        body: None,
    },
    Endpoint {
        name: "get_refrigerator_categories",
        description: "List the categories of a refrigerator.",
        method: HttpMethod::Get,
        path: "/api/refrigerators/{refrigerator_id}/categories",
        fields: &[FRIDGE_ID],
        body: None,
    },
    Endpoint {
        name: "get_members",
        description: "List the members sharing a refrigerator.",
        method: HttpMethod::Get,
        path: "/api/refrigerators/{refrigerator_id}/members",
        fields: &[FRIDGE_ID],
        body: None,
    },
    Endpoint {
        name: "get_refrigerator_state",
        description: "Summarize stock levels and expiring ingredients of a refrigerator.",
        method: HttpMethod::Get,
        path: "/api/refrigerators/{refrigerator_id}/state",
        fields: &[FRIDGE_ID],
        body: None,
    },
];

const REFRIGERATOR_SENSITIVE: &[Endpoint] = &[
    Endpoint {
        name: "create_refrigerator",
        description: "Create a new refrigerator.",
        method: HttpMethod::Post,
        path: "/api/refrigerators",
        fields: &[
            ("name", "string", "Refrigerator name", true),
            ("description", "string", "Optional description", false),
        ],
        body: None,
    },
    Endpoint {
        name: "update_refrigerator",
        description: "Rename a refrigerator or change its description.",
        method: HttpMethod::Put,
        path: "/api/refrigerators/{refrigerator_id}",
        fields: &[
            FRIDGE_ID,
            ("name", "string", "New name", false),
            ("description", "string", "New description", false),
        ],
        body: None,
    },
    Endpoint {
        name: "update_refrigerator_state",
        description: "Set the state value of a refrigerator.",
        method: HttpMethod::Put,
        path: "/api/refrigerators/{refrigerator_id}/state",
        fields: &[FRIDGE_ID, ("state", "string", "New state value", true)],
        body: None,
    },
    Endpoint {
        name: "delete_refrigerator",
        description: "Delete a refrigerator and everything in it.",
        method: HttpMethod::Delete,
        path: "/api/refrigerators/{refrigerator_id}",
        fields: &[FRIDGE_ID],
        body: None,
    },
    Endpoint {
        name: "add_ingredient",
        description: "Add an ingredient to a refrigerator category.",
        method: HttpMethod::Post,
        path: "/api/refrigerators/{refrigerator_id}/categories/{category_id}/ingredients",
        fields: &[
            FRIDGE_ID,
            CATEGORY_ID,
            ("name", "string", "Ingredient name", true),
            ("quantity", "string", "Amount, as text", true),
            ("unit", "string", "One of g, kg, ml, l, 개, 봉, 팩, 병", true),
            ("expiry_date", "string", "Expiry date (ISO 8601)", false),
        ],
        body: Some(ingredient_body),
    },
    Endpoint {
        name: "update_ingredient",
        description: "Change an ingredient's name, amount, unit or expiry date, or move it to another category.",
        method: HttpMethod::Patch,
        path: "/api/refrigerators/{refrigerator_id}/categories/{category_id}/ingredients/{ingredient_id}",
        fields: &[
            FRIDGE_ID,
            CATEGORY_ID,
            INGREDIENT_ID,
            ("name", "string", "New name", false),
            ("quantity", "string", "New amount, as text", false),
            ("unit", "string", "New unit", false),
            ("expiry_date", "string", "New expiry date (ISO 8601)", false),
            ("move_to_category_id", "integer", "Category to move the ingredient to", false),
        ],
        body: Some(ingredient_body),
    },
    Endpoint {
        name: "delete_ingredient",
        description: "Remove an ingredient from a refrigerator.",
        method: HttpMethod::Delete,
        path: "/api/refrigerators/{refrigerator_id}/categories/{category_id}/ingredients/{ingredient_id}",
        fields: &[FRIDGE_ID, CATEGORY_ID, INGREDIENT_ID],
        body: None,
    },
    Endpoint {
        name: "share_refrigerator",
        description: "Invite someone to a refrigerator by email.",
        method: HttpMethod::Post,
        path: "/api/refrigerators/{refrigerator_id}/invitations",
        fields: &[FRIDGE_ID, ("email", "string", "Invitee email", true)],
        body: None,
    },
    Endpoint {
        name: "add_refrigerator_multiple_categories",
        description: "Create several custom categories in a refrigerator at once.",
        method: HttpMethod::Post,
        path: "/api/refrigerators/{refrigerator_id}/categories/batch",
        fields: &[
            FRIDGE_ID,
            ("categories", "array", "Category names", true),
            ("icon", "string", "Icon shared by the new categories", false),
        ],
        body: Some(category_batch_body),
    },
    Endpoint {
        name: "add_refrigerator_single_category_in_multi_language",
        description: "Create one category named in Korean, English and Japanese.",
        method: HttpMethod::Post,
        path: "/api/refrigerators/{refrigerator_id}/categories",
        fields: &[
            FRIDGE_ID,
            ("ko_category", "string", "Korean name", true),
            ("en_category", "string", "English name", true),
            ("ja_category", "string", "Japanese name", true),
            ("icon", "string", "Category icon", false),
        ],
        body: Some(multi_language_category_body),
    },
    Endpoint {
        name: "update_category",
        description: "Rename a category or change its icon.",
        method: HttpMethod::Put,
        path: "/api/refrigerators/{refrigerator_id}/categories/{category_id}",
        fields: &[
            FRIDGE_ID,
            CATEGORY_ID,
            (
                "translations",
                "array",
                "Names per language, e.g. [{\"language\": \"ko\", \"name\": \"음료수\"}]",
                true,
            ),
            ("icon", "string", "New icon", false),
        ],
        body: None,
    },
    Endpoint {
        name: "delete_category",
        description: "Delete a category and its ingredients.",
        method: HttpMethod::Delete,
        path: "/api/refrigerators/{refrigerator_id}/categories/{category_id}",
        fields: &[FRIDGE_ID, CATEGORY_ID],
        body: None,
    },
];

const RECIPE_SAFE: &[Endpoint] = &[
    Endpoint {
        name: "get_recipe_details",
        description: "Show a recipe with ingredients and steps.",
        method: HttpMethod::Get,
        path: "/api/recipes/{recipe_id}",
        fields: &[RECIPE_ID],
        body: None,
    },
    Endpoint {
        name: "get_favorite_recipes",
        description: "List the user's favorite recipes.",
        method: HttpMethod::Get,
        path: "/api/recipes/favorites",
        fields: &[],
        body: None,
    },
    Endpoint {
        name: "get_shared_recipes",
        description: "List recipes shared with the user.",
        method: HttpMethod::Get,
        path: "/api/recipes/shared",
        fields: &[],
        body: None,
    },
    Endpoint {
        name: "get_recipe_with_keyword",
        description: "Search the user's recipes by keyword.",
        method: HttpMethod::Post,
        path: "/api/recipes/search",
        fields: &[("keyword", "string", "Search keyword", true)],
        body: None,
    },
    Endpoint {
        name: "search_shared_recipes",
        description: "Search shared recipes by keyword.",
        method: HttpMethod::Post,
        path: "/api/recipes/shared/search",
        fields: &[("keyword", "string", "Search keyword", true)],
        body: None,
    },
];

const RECIPE_SENSITIVE: &[Endpoint] = &[
    Endpoint {
        name: "create_recipe",
        description: "Create a private recipe in one language.",
        method: HttpMethod::Post,
        path: "/api/recipes",
        fields: &[
            ("title", "string", "Recipe title", true),
            ("content", "string", "Ingredients and steps", true),
            ("description", "string", "Short description", true),
            ("tags", "array", "Tags", true),
            ("language", "string", "Language code: ko, en or ja", true),
        ],
        body: Some(new_recipe_body),
    },
    Endpoint {
        name: "update_recipe",
        description: "Edit a recipe's text in every language and its tags.",
        method: HttpMethod::Put,
        path: "/api/recipes/{recipe_id}",
        fields: &[
            RECIPE_ID,
            (
                "translations",
                "array",
                "One entry per language: {language, title, content, description}",
                true,
            ),
            ("tags", "array", "Tags", true),
        ],
        body: None,
    },
    Endpoint {
        name: "delete_recipe",
        description: "Delete a recipe.",
        method: HttpMethod::Delete,
        path: "/api/recipes/{recipe_id}",
        fields: &[RECIPE_ID],
        body: None,
    },
    Endpoint {
        name: "share_recipe",
        description: "Share a recipe with other users.",
        method: HttpMethod::Post,
        path: "/api/recipes/{recipe_id}/share",
        fields: &[RECIPE_ID, ("user_ids", "array", "IDs of the users to share with", true)],
        body: Some(share_recipe_body),
    },
    Endpoint {
        name: "toggle_favorite_many_recipes",
        description: "Add or remove several recipes from favorites.",
        method: HttpMethod::Post,
        path: "/api/recipes/favorites/batch",
        fields: &[
            ("recipe_ids", "array", "Recipe IDs to toggle", true),
            ("action", "string", "add or remove", true),
        ],
        body: Some(favorites_body),
    },
];

/// Moves `from` to `to` when present
fn rename(args: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = args.remove(from) {
        args.insert(to.to_string(), value);
    }
}

fn ingredient_body(mut args: Map<String, Value>) -> Value {
    rename(&mut args, "expiry_date", "expiryDate");
    rename(&mut args, "move_to_category_id", "refrigeratorCategoryId");
    Value::Object(args)
}

fn category_icon(args: &Map<String, Value>) -> Value {
    args.get("icon")
        .and_then(Value::as_str)
        .filter(|icon| !icon.is_empty())
        .map_or_else(|| json!(DEFAULT_CATEGORY_ICON), |icon| json!(icon))
}

fn category_batch_body(mut args: Map<String, Value>) -> Value {
    let icon = category_icon(&args);
    let names = match args.remove("categories") {
        Some(Value::Array(names)) => names,
        _ => Vec::new(),
    };
    let categories: Vec<Value> = names
        .into_iter()
        .map(|name| {
            json!({
                "type": "custom",
                "icon": icon,
                "translations": [{ "language": "ko", "name": name }],
            })
        })
        .collect();
    json!({ "categories": categories })
}

fn multi_language_category_body(mut args: Map<String, Value>) -> Value {
    let icon = category_icon(&args);
    let mut name = |key: &str| args.remove(key).unwrap_or(Value::Null);
    json!({
        "type": "system",
        "icon": icon,
        "translations": [
            { "language": "ko", "name": name("ko_category") },
            { "language": "en", "name": name("en_category") },
            { "language": "ja", "name": name("ja_category") },
        ],
    })
}

fn new_recipe_body(mut args: Map<String, Value>) -> Value {
    let mut take = |key: &str| args.remove(key).unwrap_or(Value::Null);
    let translation = json!({
        "language": take("language"),
        "title": take("title"),
        "content": take("content"),
        "description": take("description"),
    });
    json!({
        "type": "ai",
        "isPublic": false,
        "translations": [translation],
        "tags": take("tags"),
    })
}

fn share_recipe_body(mut args: Map<String, Value>) -> Value {
    rename(&mut args, "user_ids", "userIds");
    Value::Object(args)
}

fn favorites_body(mut args: Map<String, Value>) -> Value {
    rename(&mut args, "recipe_ids", "recipeIds");
    Value::Object(args)
}

fn schema(fields: &[Field]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, ty, description, is_required) in fields {
        let mut prop = json!({ "type": ty, "description": description });
        if *ty == "array" {
            prop["items"] = json!({});
        }
        properties.insert((*name).to_string(), prop);
        if *is_required {
            required.push(*name);
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

fn names(endpoints: &[Endpoint]) -> Vec<&'static str> {
    endpoints.iter().map(|e| e.name).collect()
}

/// Every kitchen endpoint bound to `backend`
pub fn kitchen_actions(backend: &Arc<BackendClient>) -> ActionRegistry {
    [REFRIGERATOR_SAFE, REFRIGERATOR_SENSITIVE, RECIPE_SAFE, RECIPE_SENSITIVE]
        .into_iter()
        .flatten()
        .fold(ActionRegistry::new(), |registry, e| {
            registry.with(Arc::new(HttpAction::new(
                Arc::clone(backend),
                e.name,
                e.description,
                e.method,
                e.path,
                schema(e.fields),
            )
            .with_body(e.body)))
        })
}

pub fn primary_spec() -> PrimarySpec {
    PrimarySpec::new(
        "main assistant",
        "You are the main assistant of a kitchen management app. \
         Work out what the user needs and delegate to the refrigerator or recipe \
         assistant. The user does not know other assistants exist; never mention them.\n\
         User context: {context_info}\nCurrent time: {time}",
    )
}

pub fn specialists() -> Vec<AssistantSpec> {
    vec![
        AssistantSpec::new(
            REFRIGERATOR_ASSISTANT,
            "refrigerator assistant",
            "to_refrigerator_assistant",
            "You are the {display_name}. You manage refrigerators, categories, \
             ingredients and members. Request one action at a time. If the request is \
             outside your actions, call complete_or_escalate.\n\
             User context: {context_info}\nCurrent time: {time}",
        )
        .with_description("Hand the conversation to the refrigerator assistant.")
        .with_safe(names(REFRIGERATOR_SAFE))
        .with_sensitive(names(REFRIGERATOR_SENSITIVE))
        .with_delegates([RECIPE_ASSISTANT]),
        AssistantSpec::new(
            RECIPE_ASSISTANT,
            "recipe assistant",
            "to_recipe_assistant",
            "You are the {display_name}. You find, create, edit and share recipes. \
             Request one action at a time. If the request is outside your actions, \
             call complete_or_escalate.\n\
             User context: {context_info}\nCurrent time: {time}",
        )
        .with_description("Hand the conversation to the recipe assistant.")
        .with_safe(names(RECIPE_SAFE))
        .with_sensitive(names(RECIPE_SENSITIVE))
        .with_delegates([REFRIGERATOR_ASSISTANT]),
    ]
}
