use std::sync::{Arc, OnceLock};

use gqlkit::async_graphql::dynamic::{FieldFuture, FieldValue, TypeRef};
use gqlkit::async_graphql::Error as GraphQLError;
use gqlkit::model::to_graphql;
use gqlkit::{
    attach_relation, belongs_to, has_many, AppContext, ArgSpec, Document, FieldSpec, Filter,
    MemoryModel, Model, ModuleDescriptor, ModuleMeta, ModuleSet, TypeComposer, TypeResolver,
};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;

pub const MODULE_ID: &str = "subscription";
pub const TYPE_NAME: &str = "UserSubscription";
pub const MODEL: &str = "subscriptions";

const ACTIVE: &str = "active";
const CANCELLED: &str = "cancelled";

/// The user model, bound once the relations phase has run.
type UserModel = Arc<OnceLock<Arc<dyn Model>>>;

pub fn subscription_type() -> TypeComposer {
    TypeComposer::object(TYPE_NAME)
        .with_description("A user's plan subscription")
        .with_field(FieldSpec::property("id", TypeRef::named_nn(TypeRef::ID)))
        .with_field(FieldSpec::property("userId", TypeRef::named_nn(TypeRef::ID)))
        .with_field(FieldSpec::property("plan", TypeRef::named_nn(TypeRef::STRING)))
        .with_field(FieldSpec::property("status", TypeRef::named_nn(TypeRef::STRING)))
        .with_field(FieldSpec::property("createdAt", TypeRef::named(TypeRef::STRING)))
}

fn list<'a>(docs: Vec<Document>) -> Option<FieldValue<'a>> {
    Some(FieldValue::list(
        docs.into_iter().map(|d| FieldValue::value(to_graphql(d))),
    ))
}

fn subscriptions_query(model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new("subscriptions", TypeRef::named_nn_list_nn(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let mut filter = Filter::all();
            if let Some(user_id) = ctx.args.get("userId") {
                filter = filter.and_eq("userId", user_id.string()?);
            }
            if let Some(status) = ctx.args.get("status") {
                filter = filter.and_eq("status", status.string()?);
            }
            Ok(list(model.find_many(&filter).await?))
        })
    })
    .argument(ArgSpec::new("userId", TypeRef::named(TypeRef::ID)))
    .argument(ArgSpec::new("status", TypeRef::named(TypeRef::STRING)))
}

fn subscribe_mutation(
    model: Arc<dyn Model>,
    users: UserModel,
    cfg: Arc<SubscriptionConfig>,
) -> FieldSpec {
    FieldSpec::new("subscribe", TypeRef::named_nn(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        let users = Arc::clone(&users);
        let cfg = Arc::clone(&cfg);
        FieldFuture::new(async move {
            let user_id = ctx.args.try_get("userId")?.string()?;
            let plan = ctx
                .args
                .get("plan")
                .map(|v| v.string())
                .transpose()?
                .unwrap_or(cfg.default_plan.as_str());

            if !cfg.accepts(plan) {
                return Err(GraphQLError::new(format!("unknown plan '{plan}'")));
            }
            if let Some(users) = users.get() {
                if users.find_by_id(user_id).await?.is_none() {
                    return Err(GraphQLError::new(format!("user '{user_id}' not found")));
                }
            } else {
                debug!(user_id, "User model not bound; skipping existence check");
            }

            let mut doc = Document::new();
            doc.insert("userId".into(), Json::from(user_id));
            doc.insert("plan".into(), Json::from(plan));
            doc.insert("status".into(), Json::from(ACTIVE));
            let created = model.create(doc).await?;
            Ok(Some(FieldValue::value(to_graphql(created))))
        })
    })
    .argument(ArgSpec::new("userId", TypeRef::named_nn(TypeRef::ID)))
    .argument(ArgSpec::new("plan", TypeRef::named(TypeRef::STRING)))
}

fn cancel_mutation(model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new("cancelSubscription", TypeRef::named(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?;
            let mut patch = Document::new();
            patch.insert("status".into(), Json::from(CANCELLED));
            let updated = model.update(id, patch).await?;
            Ok(updated.map(|d| FieldValue::value(to_graphql(d))))
        })
    })
    .argument(ArgSpec::new("id", TypeRef::named_nn(TypeRef::ID)))
}

/// Links `User` and `UserSubscription`. A missing user model is logged and
/// leaves both types untouched.
async fn link_user(
    ctx: AppContext,
    _modules: ModuleSet,
    subscriptions: Arc<dyn Model>,
    users_slot: UserModel,
) -> anyhow::Result<()> {
    let Some(users) = ctx.model(user::MODEL) else {
        warn!(model = user::MODEL, "User model not registered; relations skipped");
        return Ok(());
    };
    let _ = users_slot.set(Arc::clone(&users));

    let on_user = TypeResolver::for_module(user::MODULE_ID);
    let on_subscription = TypeResolver::for_module(MODULE_ID);

    let forward = attach_relation(
        &ctx,
        &on_user,
        user::TYPE_NAME,
        has_many("subscriptions", TYPE_NAME, subscriptions, "userId", "id"),
    );
    let backward = attach_relation(
        &ctx,
        &on_subscription,
        TYPE_NAME,
        belongs_to("user", user::TYPE_NAME, users, "userId"),
    );
    info!(forward, backward, "Subscription relations wired");
    Ok(())
}

/// Factory registered for discovery.
pub fn build(ctx: &AppContext) -> anyhow::Result<ModuleDescriptor> {
    let cfg: SubscriptionConfig = ctx.module_config(MODULE_ID)?;
    cfg.validate()?;
    let cfg = Arc::new(cfg);

    let model: Arc<dyn Model> = Arc::new(MemoryModel::new(MODEL));
    let users: UserModel = Arc::new(OnceLock::new());
    let relation_model = Arc::clone(&model);
    let relation_users = Arc::clone(&users);

    Ok(ModuleDescriptor::new(MODULE_ID)
        .with_meta(ModuleMeta {
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            scope: Some("billing".to_string()),
            description: Some("Plan subscriptions per user".to_string()),
            dependencies: vec![user::MODULE_ID.to_string()],
            ..ModuleMeta::default()
        })
        .with_model(MODEL, Arc::clone(&model))
        .with_type_composer("SubscriptionTC", subscription_type())
        .with_query(subscriptions_query(Arc::clone(&model)))
        .with_mutation(subscribe_mutation(Arc::clone(&model), users, cfg))
        .with_mutation(cancel_mutation(model))
        .with_default_on_load()
        .with_relations(move |ctx, modules| {
            link_user(
                ctx,
                modules,
                Arc::clone(&relation_model),
                Arc::clone(&relation_users),
            )
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlkit::async_graphql::dynamic::Schema;
    use gqlkit::{compose_schema, ModuleHost, SchemaNamespace};
    use serde_json::json;

    async fn schema_with(load_user: bool) -> Schema {
        let ctx = AppContext::default();
        let host = ModuleHost::new(ctx.clone()).unwrap();
        if load_user {
            host.load(user::build).unwrap();
        }
        host.load(build).unwrap();
        let report = host.post_load().await;
        assert!(report.is_clean(), "{:?}", report.failures);
        compose_schema(&ctx, &mut SchemaNamespace::new()).unwrap()
    }

    async fn data(schema: &Schema, query: &str) -> Json {
        let response = schema.execute(query).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        response.data.into_json().unwrap()
    }

    #[tokio::test]
    async fn relations_link_both_directions() {
        let schema = schema_with(true).await;
        let created = data(&schema, r#"mutation { createUser(email: "ada@example.com") { id } }"#).await;
        let user_id = created["createUser"]["id"].as_str().unwrap().to_string();

        data(
            &schema,
            &format!(r#"mutation {{ subscribe(userId: "{user_id}", plan: "pro") {{ id }} }}"#),
        )
        .await;

        let nested = data(
            &schema,
            &format!(
                r#"{{ user(id: "{user_id}") {{ email subscriptions {{ plan status user {{ email }} }} }} }}"#
            ),
        )
        .await;
        assert_eq!(
            nested["user"]["subscriptions"],
            json!([{ "plan": "pro", "status": "active", "user": { "email": "ada@example.com" } }])
        );
    }

    #[tokio::test]
    async fn subscribe_checks_user_and_plan() {
        let schema = schema_with(true).await;

        let missing = schema
            .execute(r#"mutation { subscribe(userId: "nobody") { id } }"#)
            .await;
        assert_eq!(missing.errors.len(), 1);

        let created = data(&schema, r#"mutation { createUser(email: "bob@example.com") { id } }"#).await;
        let user_id = created["createUser"]["id"].as_str().unwrap().to_string();
        let bad_plan = schema
            .execute(format!(
                r#"mutation {{ subscribe(userId: "{user_id}", plan: "platinum") {{ id }} }}"#
            ))
            .await;
        assert_eq!(bad_plan.errors.len(), 1);

        let ok = data(
            &schema,
            &format!(r#"mutation {{ subscribe(userId: "{user_id}") {{ id plan }} }}"#),
        )
        .await;
        assert_eq!(ok["subscribe"]["plan"], "free");

        let id = ok["subscribe"]["id"].as_str().unwrap().to_string();
        let cancelled = data(
            &schema,
            &format!(r#"mutation {{ cancelSubscription(id: "{id}") {{ status }} }}"#),
        )
        .await;
        assert_eq!(cancelled["cancelSubscription"]["status"], "cancelled");

        let active = data(&schema, r#"{ subscriptions(status: "active") { id } }"#).await;
        assert_eq!(active["subscriptions"], json!([]));
    }

    #[tokio::test]
    async fn loads_without_user_module() {
        let schema = schema_with(false).await;
        let sdl = schema.sdl();
        assert!(sdl.contains("type UserSubscription"));
        assert!(!sdl.contains("type User "));

        let ok = data(&schema, r#"mutation { subscribe(userId: "u1") { userId } }"#).await;
        assert_eq!(ok["subscribe"]["userId"], "u1");
    }
}
