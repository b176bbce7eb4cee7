use std::sync::Arc;

use futures::FutureExt;
use gqlkit::async_graphql::dynamic::{FieldFuture, FieldValue, TypeRef};
use gqlkit::async_graphql::Error as GraphQLError;
use gqlkit::descriptor::Action;
use gqlkit::model::to_graphql;
use gqlkit::{
    AppContext, ArgSpec, Document, FieldSpec, Filter, MemoryModel, Model, ModuleDescriptor,
    ModuleMeta, TypeComposer,
};
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::config::{SeedUser, UserConfig};

pub const MODULE_ID: &str = "user";
pub const TYPE_NAME: &str = "User";
pub const MODEL: &str = "users";

pub fn user_type() -> TypeComposer {
    TypeComposer::object(TYPE_NAME)
        .with_description("A registered account")
        .with_field(FieldSpec::property("id", TypeRef::named_nn(TypeRef::ID)))
        .with_field(FieldSpec::property("email", TypeRef::named_nn(TypeRef::STRING)))
        .with_field(FieldSpec::property("displayName", TypeRef::named(TypeRef::STRING)))
        .with_field(FieldSpec::property("role", TypeRef::named_nn(TypeRef::STRING)))
}

/// Accepts documents whose `email` has a non-empty local part and domain.
pub fn validate_email(doc: &Json) -> Result<(), String> {
    let email = doc
        .get("email")
        .and_then(Json::as_str)
        .ok_or_else(|| "email is required".to_string())?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(format!("'{email}' is not a valid email address")),
    }
}

fn user_query(model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new("user", TypeRef::named(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?;
            let doc = model.find_by_id(id).await?;
            Ok(doc.map(|d| FieldValue::value(to_graphql(d))))
        })
    })
    .argument(ArgSpec::new("id", TypeRef::named_nn(TypeRef::ID)))
    .description("Fetch one user by id")
}

fn users_query(model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new("users", TypeRef::named_nn_list_nn(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let filter = match ctx.args.get("role") {
                Some(role) => Filter::eq("role", role.string()?),
                None => Filter::all(),
            };
            let docs = model.find_many(&filter).await?;
            Ok(Some(FieldValue::list(
                docs.into_iter().map(|d| FieldValue::value(to_graphql(d))),
            )))
        })
    })
    .argument(ArgSpec::new("role", TypeRef::named(TypeRef::STRING)))
}

fn new_user(email: &str, display_name: Option<&str>, role: &str) -> Document {
    let mut doc = Document::new();
    doc.insert("email".into(), Json::from(email));
    doc.insert("displayName".into(), Json::from(display_name));
    doc.insert("role".into(), Json::from(role));
    doc
}

fn create_user_mutation(model: Arc<dyn Model>, default_role: String) -> FieldSpec {
    FieldSpec::new("createUser", TypeRef::named_nn(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        let default_role = default_role.clone();
        FieldFuture::new(async move {
            let email = ctx.args.try_get("email")?.string()?;
            let display_name = ctx.args.get("displayName").map(|v| v.string()).transpose()?;
            let role = ctx
                .args
                .get("role")
                .map(|v| v.string())
                .transpose()?
                .unwrap_or(default_role.as_str());

            let doc = new_user(email, display_name, role);
            validate_email(&Json::Object(doc.clone()))?;
            if !model.find_many(&Filter::eq("email", email)).await?.is_empty() {
                return Err(GraphQLError::new(format!(
                    "email '{email}' is already registered"
                )));
            }

            let created = model.create(doc).await?;
            debug!(email, "User created");
            Ok(Some(FieldValue::value(to_graphql(created))))
        })
    })
    .argument(ArgSpec::new("email", TypeRef::named_nn(TypeRef::STRING)))
    .argument(ArgSpec::new("displayName", TypeRef::named(TypeRef::STRING)))
    .argument(ArgSpec::new("role", TypeRef::named(TypeRef::STRING)))
}

/// `{ "email": ... }` → the stored user or `null`.
fn find_by_email_action(model: Arc<dyn Model>) -> Action {
    Arc::new(move |input: Json| {
        let model = Arc::clone(&model);
        async move {
            let email = input
                .get("email")
                .and_then(Json::as_str)
                .ok_or_else(|| anyhow::anyhow!("'email' is required"))?;
            let found = model.find_many(&Filter::eq("email", email)).await?;
            Ok::<_, anyhow::Error>(found.into_iter().next().map_or(Json::Null, Json::Object))
        }
        .boxed()
    })
}

async fn seed_users(model: &dyn Model, seed: &[SeedUser], default_role: &str) -> anyhow::Result<()> {
    for user in seed {
        let mut doc = new_user(
            &user.email,
            user.display_name.as_deref(),
            user.role.as_deref().unwrap_or(default_role),
        );
        if let Some(id) = &user.id {
            doc.insert("id".into(), Json::from(id.as_str()));
        }
        validate_email(&Json::Object(doc.clone())).map_err(anyhow::Error::msg)?;
        model.create(doc).await?;
    }
    Ok(())
}

/// Factory registered for discovery.
pub fn build(ctx: &AppContext) -> anyhow::Result<ModuleDescriptor> {
    let cfg: UserConfig = ctx.module_config(MODULE_ID)?;
    debug!(default_role = %cfg.default_role, seed = cfg.seed.len(), "Building user module");

    let model: Arc<dyn Model> = Arc::new(MemoryModel::new(MODEL));
    let seed_model = Arc::clone(&model);
    let seed = Arc::new(cfg.seed);
    let default_role = cfg.default_role.clone();

    Ok(ModuleDescriptor::new(MODULE_ID)
        .with_meta(ModuleMeta {
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            scope: Some("accounts".to_string()),
            description: Some("User accounts".to_string()),
            ..ModuleMeta::default()
        })
        .with_model(MODEL, Arc::clone(&model))
        .with_type_composer("UserTC", user_type())
        .with_query(user_query(Arc::clone(&model)))
        .with_query(users_query(Arc::clone(&model)))
        .with_mutation(create_user_mutation(Arc::clone(&model), cfg.default_role))
        .with_validator("email", Arc::new(validate_email))
        .with_action("find_by_email", find_by_email_action(model))
        .with_default_on_load()
        .with_init(move |_ctx, _modules| {
            let model = Arc::clone(&seed_model);
            let seed = Arc::clone(&seed);
            let default_role = default_role.clone();
            async move {
                seed_users(model.as_ref(), &seed, &default_role).await?;
                info!(seeded = seed.len(), "User module initialized");
                Ok::<(), anyhow::Error>(())
            }
        }))
}
