use std::collections::BTreeSet;
use std::sync::Arc;

use gqlkit::async_graphql::dynamic::{FieldFuture, FieldValue, TypeRef};
use gqlkit::async_graphql::Value;
use gqlkit::model::{document, to_graphql};
use gqlkit::{
    attach_relation, belongs_to, compose_schema, has_many, AppContext, ComposeError,
    ComposerConfig, FieldSpec, Filter, LookupStrategy, MemoryModel, Model, ModuleDescriptor,
    ModuleHost, ResolverConflictPolicy, ScalarConfig, SchemaComposer, SchemaNamespace,
    TypeComposer, TypeResolver,
};
use parking_lot::Mutex;
use serde_json::json;

fn string(name: &str) -> FieldSpec {
    FieldSpec::property(name, TypeRef::named(TypeRef::STRING))
}

fn constant(name: &str, value: &'static str) -> FieldSpec {
    FieldSpec::new(name, TypeRef::named_nn(TypeRef::STRING), move |_| {
        FieldFuture::new(async move { Ok(Some(Value::from(value))) })
    })
}

fn list_all(name: &str, ty: &str, model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new(name, TypeRef::named_nn_list_nn(ty), move |_| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let docs = model.find_many(&Filter::all()).await?;
            Ok(Some(FieldValue::list(
                docs.into_iter().map(|d| FieldValue::value(to_graphql(d))),
            )))
        })
    })
}

fn host_with(config: ComposerConfig) -> (AppContext, ModuleHost) {
    let ctx = AppContext::new(config);
    let host = ModuleHost::new(ctx.clone()).unwrap();
    (ctx, host)
}

async fn run(schema: &gqlkit::async_graphql::dynamic::Schema, query: &str) -> serde_json::Value {
    let response = schema.execute(query).await;
    assert!(response.errors.is_empty(), "errors: {:?}", response.errors);
    response.data.into_json().unwrap()
}

#[tokio::test]
async fn composition_is_idempotent() {
    let (ctx, host) = host_with(ComposerConfig {
        timestamps: gqlkit::TimestampConfig {
            enabled: true,
            ..Default::default()
        },
        ..Default::default()
    });
    host.load(|_| {
        Ok(ModuleDescriptor::new("user")
            .with_type_composer("UserTC", TypeComposer::object("User").with_field(string("email")))
            .with_query(FieldSpec::property("me", TypeRef::named("User")))
            .with_default_on_load())
    })
    .unwrap();

    let mut ns = SchemaNamespace::new();
    let first = compose_schema(&ctx, &mut ns).unwrap().sdl();
    let second = compose_schema(&ctx, &mut ns).unwrap().sdl();
    assert_eq!(first, second);
    assert!(first.contains("createdAt"));
    assert_eq!(ns.len(), 1);
}

#[tokio::test]
async fn first_type_definition_wins() {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| {
        Ok(ModuleDescriptor::new("user")
            .with_type_composer("UserTC", TypeComposer::object("User").with_field(string("email")))
            .with_query(FieldSpec::property("me", TypeRef::named("User")))
            .with_default_on_load())
    })
    .unwrap();
    host.load(|_| {
        Ok(ModuleDescriptor::new("legacy")
            .with_type_composer("UserTC", TypeComposer::object("User").with_field(string("login")))
            .with_default_on_load())
    })
    .unwrap();

    let mut ns = SchemaNamespace::new();
    let (schema, report) = SchemaComposer::new()
        .compose_with_report(&ctx, &mut ns)
        .unwrap();

    assert_eq!(report.collisions.len(), 1);
    assert_eq!(report.collisions[0].type_name, "User");
    assert_eq!(report.collisions[0].kept_from, "user");
    assert_eq!(report.collisions[0].dropped_from, "legacy");
    assert_eq!(ns.owner("User"), Some("user"));

    let sdl = schema.sdl();
    assert!(sdl.contains("email"));
    assert!(!sdl.contains("login"));
}

#[tokio::test]
async fn root_fields_from_every_module_are_merged() {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| {
        Ok(ModuleDescriptor::new("a")
            .with_query(constant("alpha", "a"))
            .with_default_on_load())
    })
    .unwrap();
    host.load(|_| {
        Ok(ModuleDescriptor::new("b")
            .with_query(constant("beta", "b"))
            .with_mutation(constant("touch", "ok"))
            .with_default_on_load())
    })
    .unwrap();

    let mut ns = SchemaNamespace::new();
    let schema = compose_schema(&ctx, &mut ns).unwrap();
    assert_eq!(
        ns.query().field_names(),
        vec!["alpha".to_string(), "beta".to_string()]
    );
    assert_eq!(ns.module_resolvers().len(), 2);

    let data = run(&schema, "{ alpha beta }").await;
    assert_eq!(data, json!({"alpha": "a", "beta": "b"}));
    let data = run(&schema, "mutation { touch }").await;
    assert_eq!(data, json!({"touch": "ok"}));
}

fn root_module(id: &'static str) -> gqlkit::ModuleFactory {
    match id {
        "a" => |_| {
            Ok(ModuleDescriptor::new("a")
                .with_query(constant("alpha", "a"))
                .with_mutation(constant("reset", "a"))
                .with_default_on_load())
        },
        "b" => |_| {
            Ok(ModuleDescriptor::new("b")
                .with_query(constant("beta", "b"))
                .with_default_on_load())
        },
        _ => |_| {
            Ok(ModuleDescriptor::new("c")
                .with_query(constant("gamma", "c"))
                .with_mutation(constant("touch", "c"))
                .with_default_on_load())
        },
    }
}

fn root_field_sets(order: &[&'static str]) -> (BTreeSet<String>, BTreeSet<String>) {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load_all(order.iter().map(|id| root_module(*id))).unwrap();
    let mut ns = SchemaNamespace::new();
    compose_schema(&ctx, &mut ns).unwrap();
    let query = ns.query().field_names().into_iter().collect();
    let mutation = ns
        .mutation()
        .map(|m| m.field_names().into_iter().collect())
        .unwrap_or_default();
    (query, mutation)
}

#[tokio::test]
async fn root_field_sets_ignore_module_order() {
    let forward = root_field_sets(&["a", "b", "c"]);
    let reversed = root_field_sets(&["c", "b", "a"]);
    assert_eq!(forward, reversed);
    assert_eq!(
        forward.0,
        BTreeSet::from(["alpha".to_string(), "beta".to_string(), "gamma".to_string()])
    );
    assert_eq!(
        forward.1,
        BTreeSet::from(["reset".to_string(), "touch".to_string()])
    );
}

#[tokio::test]
async fn later_module_lifecycle_runs_after_relation_failure() {
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let (_ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| {
        Ok(ModuleDescriptor::new("a")
            .with_default_on_load()
            .with_relations(|_, _| async { Err::<(), _>(anyhow::anyhow!("target offline")) }))
    })
    .unwrap();
    let (c1, c2, c3) = (calls.clone(), calls.clone(), calls.clone());
    host.load(move |_| {
        Ok(ModuleDescriptor::new("b")
            .with_default_on_load()
            .with_relations(move |_, _| {
                let c = c1.clone();
                async move {
                    c.lock().push("relations".to_string());
                    Ok(())
                }
            })
            .with_hooks(move |_, _| {
                let c = c2.clone();
                async move {
                    c.lock().push("hooks".to_string());
                    Ok(())
                }
            })
            .with_init(move |_, _| {
                let c = c3.clone();
                async move {
                    c.lock().push("init".to_string());
                    Ok(())
                }
            }))
    })
    .unwrap();

    let report = host.post_load().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].module, "a");
    assert_eq!(*calls.lock(), vec!["relations", "hooks", "init"]);
}

#[tokio::test]
async fn empty_module_set_still_builds() {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| Ok(ModuleDescriptor::new("quiet").with_default_on_load()))
        .unwrap();

    let mut ns = SchemaNamespace::new();
    let (schema, report) = SchemaComposer::new()
        .compose_with_report(&ctx, &mut ns)
        .unwrap();

    assert!(report.placeholder_added);
    assert!(ns.mutation().is_none());
    assert!(!schema.sdl().contains("type Mutation"));
    assert_eq!(run(&schema, "{ _empty }").await, json!({"_empty": null}));
}

#[tokio::test]
async fn compose_requires_host() {
    let ctx = AppContext::default();
    let err = compose_schema(&ctx, &mut SchemaNamespace::new()).unwrap_err();
    assert!(matches!(err, ComposeError::MissingHost));
}

#[tokio::test]
async fn conflicting_root_fields_follow_policy() {
    fn load_pair(host: &ModuleHost) {
        host.load(|_| {
            Ok(ModuleDescriptor::new("a")
                .with_query(constant("ping", "from-a"))
                .with_default_on_load())
        })
        .unwrap();
        host.load(|_| {
            Ok(ModuleDescriptor::new("b")
                .with_query(constant("ping", "from-b"))
                .with_default_on_load())
        })
        .unwrap();
    }

    let (ctx, host) = host_with(ComposerConfig::default());
    load_pair(&host);
    let (schema, report) = SchemaComposer::new()
        .compose_with_report(&ctx, &mut SchemaNamespace::new())
        .unwrap();
    assert_eq!(report.resolver_overrides.len(), 1);
    assert_eq!(report.resolver_overrides[0].winner, "b");
    assert_eq!(run(&schema, "{ ping }").await, json!({"ping": "from-b"}));

    let (ctx, host) = host_with(ComposerConfig {
        resolver_conflicts: ResolverConflictPolicy::Reject,
        ..Default::default()
    });
    load_pair(&host);
    let err = compose_schema(&ctx, &mut SchemaNamespace::new()).unwrap_err();
    match err {
        ComposeError::ResolverConflict {
            root,
            field,
            first,
            second,
        } => {
            assert_eq!(root, "Query");
            assert_eq!(field, "ping");
            assert_eq!(first, "a");
            assert_eq!(second, "b");
        }
        other => panic!("expected ResolverConflict, got: {other:?}"),
    }
}

#[tokio::test]
async fn dangling_type_reference_fails_build() {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| {
        Ok(ModuleDescriptor::new("broken")
            .with_query(FieldSpec::property("ghost", TypeRef::named("Ghost")))
            .with_default_on_load())
    })
    .unwrap();

    let err = compose_schema(&ctx, &mut SchemaNamespace::new()).unwrap_err();
    let ComposeError::Build(cause) = &err else {
        panic!("expected Build, got: {err:?}");
    };
    assert!(cause.0.contains("Ghost"), "{cause}");
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), cause.to_string());
}

#[tokio::test]
async fn invalid_custom_scalars_are_skipped() {
    let config = ComposerConfig {
        scalars: vec![
            ScalarConfig {
                name: "DateTime".into(),
                description: Some("RFC 3339 timestamp".into()),
            },
            ScalarConfig {
                name: "String".into(),
                description: None,
            },
            ScalarConfig {
                name: "bad-name".into(),
                description: None,
            },
        ],
        ..Default::default()
    };
    let (ctx, host) = host_with(config);
    host.load(|_| {
        Ok(ModuleDescriptor::new("clock")
            .with_query(FieldSpec::property("now", TypeRef::named("DateTime")))
            .with_default_on_load())
    })
    .unwrap();

    let (schema, report) = SchemaComposer::new()
        .with_scalar(TypeComposer::object("NotAScalar").with_field(string("x")))
        .compose_with_report(&ctx, &mut SchemaNamespace::new())
        .unwrap();

    assert_eq!(
        report.skipped_scalars,
        vec!["String".to_string(), "bad-name".to_string(), "NotAScalar".to_string()]
    );
    assert!(schema.sdl().contains("scalar DateTime"));
}

#[tokio::test]
async fn failing_relation_does_not_block_siblings() {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| {
        Ok(ModuleDescriptor::new("user")
            .with_type_composer("UserTC", TypeComposer::object("User").with_field(string("email")))
            .with_query(FieldSpec::property("me", TypeRef::named("User")))
            .with_default_on_load())
    })
    .unwrap();
    host.load(|_| {
        Ok(ModuleDescriptor::new("broken")
            .with_default_on_load()
            .with_relations(|_, _| async { Err::<(), _>(anyhow::anyhow!("target offline")) }))
    })
    .unwrap();
    host.load(|_| {
        Ok(ModuleDescriptor::new("profile")
            .with_default_on_load()
            .with_relations(|ctx, _| async move {
                attach_relation(&ctx, &TypeResolver::for_module("user"), "User", string("bio"));
                Ok(())
            }))
    })
    .unwrap();

    let report = host.post_load().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].module, "broken");

    let schema = compose_schema(&ctx, &mut SchemaNamespace::new()).unwrap();
    let data = run(&schema, r#"{ __type(name: "User") { fields { name } } }"#).await;
    let names: Vec<_> = data["__type"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["email", "bio"]);
}

#[tokio::test]
async fn relation_falls_back_to_composed_types() {
    let (ctx, host) = host_with(ComposerConfig::default());
    host.load(|_| {
        Ok(ModuleDescriptor::new("profile")
            .with_type_composer(
                "ProfileTC",
                TypeComposer::object("Profile").with_field(string("bio")),
            )
            .with_query(FieldSpec::property("profile", TypeRef::named("Profile")))
            .with_default_on_load())
    })
    .unwrap();
    host.load(|_| {
        Ok(ModuleDescriptor::new("avatar")
            .with_default_on_load()
            .with_relations(|ctx, _| async move {
                // The profile type is owned by "profile", not by "accounts".
                let resolver = TypeResolver::for_module("accounts");
                anyhow::ensure!(
                    attach_relation(&ctx, &resolver, "Profile", string("avatarUrl")),
                    "Profile not found"
                );
                Ok(())
            }))
    })
    .unwrap();

    assert!(ctx.types().contains("Profile"));
    assert!(host.post_load().await.is_clean());
    let profile = ctx.type_composer("Profile").unwrap();
    assert!(profile.has_field("avatarUrl"));

    let strict = TypeResolver::new().then(LookupStrategy::ModuleRegistry {
        module_id: "accounts".into(),
    });
    assert!(strict.resolve(&ctx, "Profile").is_none());
}

#[tokio::test]
async fn user_subscription_scenario() {
    let users = Arc::new(MemoryModel::new("users"));
    users
        .create(document(json!({"id": "u1", "email": "ada@example.com"})).unwrap())
        .await
        .unwrap();
    let subscriptions = Arc::new(MemoryModel::new("subscriptions"));
    for (id, plan) in [("s1", "pro"), ("s2", "team")] {
        subscriptions
            .create(document(json!({"id": id, "userId": "u1", "plan": plan})).unwrap())
            .await
            .unwrap();
    }

    let (ctx, host) = host_with(ComposerConfig::default());
    let user_model: Arc<dyn Model> = users.clone();
    host.load(move |_| {
        Ok(ModuleDescriptor::new("user")
            .with_model("users", Arc::clone(&user_model))
            .with_type_composer(
                "UserTC",
                TypeComposer::object("User")
                    .with_field(FieldSpec::property("id", TypeRef::named_nn(TypeRef::ID)))
                    .with_field(string("email")),
            )
            .with_query(list_all("users", "User", user_model))
            .with_default_on_load())
    })
    .unwrap();

    let sub_model: Arc<dyn Model> = subscriptions.clone();
    host.load(move |_| {
        Ok(ModuleDescriptor::new("subscription")
            .with_model("subscriptions", Arc::clone(&sub_model))
            .with_type_composer(
                "SubscriptionTC",
                TypeComposer::object("UserSubscription")
                    .with_field(FieldSpec::property("id", TypeRef::named_nn(TypeRef::ID)))
                    .with_field(string("plan"))
                    .with_field(string("userId")),
            )
            .with_default_on_load()
            .with_relations(move |ctx, _| {
                let subs = Arc::clone(&sub_model);
                async move {
                    let users = ctx
                        .model("users")
                        .ok_or_else(|| anyhow::anyhow!("users model not registered"))?;
                    let own = TypeResolver::for_module("subscription");
                    attach_relation(
                        &ctx,
                        &TypeResolver::for_module("user"),
                        "UserTC",
                        has_many("subscriptions", "UserSubscription", subs, "userId", "id"),
                    );
                    attach_relation(
                        &ctx,
                        &own,
                        "SubscriptionTC",
                        belongs_to("user", "User", users, "userId"),
                    );
                    Ok(())
                }
            }))
    })
    .unwrap();

    assert!(host.post_load().await.is_clean());
    let schema = compose_schema(&ctx, &mut SchemaNamespace::new()).unwrap();

    let data = run(&schema, r#"{ __type(name: "User") { fields { name } } }"#).await;
    let fields = data["__type"]["fields"].as_array().unwrap();
    assert!(fields.iter().any(|f| f["name"] == "subscriptions"));

    let data = run(
        &schema,
        "{ users { email subscriptions { plan user { email } } } }",
    )
    .await;
    assert_eq!(
        data,
        json!({
            "users": [{
                "email": "ada@example.com",
                "subscriptions": [
                    {"plan": "pro", "user": {"email": "ada@example.com"}},
                    {"plan": "team", "user": {"email": "ada@example.com"}}
                ]
            }]
        })
    );
}
