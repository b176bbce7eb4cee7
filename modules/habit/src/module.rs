use std::sync::{Arc, OnceLock};

use gqlkit::async_graphql::dynamic::{FieldFuture, FieldValue, TypeRef};
use gqlkit::async_graphql::Error as GraphQLError;
use gqlkit::descriptor::{Validator, ValidatorMap};
use gqlkit::model::to_graphql;
use gqlkit::{
    attach_relation, has_many, AppContext, ArgSpec, Document, FieldSpec, Filter, MemoryModel,
    Model, ModuleAssets, ModuleDescriptor, ModuleMeta, ModuleSet, TypeComposer, TypeResolver,
};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::config::{Frequency, HabitConfig};

pub const MODULE_ID: &str = "habit";
pub const TYPE_NAME: &str = "Habit";
pub const MODEL: &str = "habits";

const FREQUENCY_TYPE: &str = "HabitFrequency";
const INPUT_TYPE: &str = "CreateHabitInput";

/// Validators registered for this module, bound during the hooks phase.
type ValidatorSlot = Arc<OnceLock<Vec<(String, Validator)>>>;

pub fn frequency_type() -> TypeComposer {
    TypeComposer::enumeration(FREQUENCY_TYPE, Frequency::ALL.map(Frequency::as_str))
}

pub fn habit_type() -> TypeComposer {
    TypeComposer::object(TYPE_NAME)
        .with_field(FieldSpec::property("id", TypeRef::named_nn(TypeRef::ID)))
        .with_field(FieldSpec::property("userId", TypeRef::named_nn(TypeRef::ID)))
        .with_field(FieldSpec::property("title", TypeRef::named_nn(TypeRef::STRING)))
        .with_field(FieldSpec::enum_property("frequency", FREQUENCY_TYPE))
        .with_field(FieldSpec::property("streak", TypeRef::named_nn(TypeRef::INT)))
        .with_field(FieldSpec::property("createdAt", TypeRef::named(TypeRef::STRING)))
}

pub fn create_input_type() -> TypeComposer {
    TypeComposer::input(INPUT_TYPE)
        .with_input_field(ArgSpec::new("userId", TypeRef::named_nn(TypeRef::ID)))
        .with_input_field(ArgSpec::new("title", TypeRef::named_nn(TypeRef::STRING)))
        .with_input_field(
            ArgSpec::new("frequency", TypeRef::named(FREQUENCY_TYPE))
                .description("Defaults to the module's configured frequency"),
        )
}

fn title_validator(max_len: usize) -> Validator {
    Arc::new(move |doc: &Json| {
        let title = doc.get("title").and_then(Json::as_str).unwrap_or_default();
        if title.trim().is_empty() {
            return Err("title must not be blank".to_string());
        }
        if title.chars().count() > max_len {
            return Err(format!("title is longer than {max_len} characters"));
        }
        Ok(())
    })
}

fn run_validators(slot: &ValidatorSlot, doc: &Document) -> Result<(), GraphQLError> {
    let value = Json::Object(doc.clone());
    for (name, validator) in slot.get().map(Vec::as_slice).unwrap_or_default() {
        validator(&value).map_err(|e| GraphQLError::new(format!("{name}: {e}")))?;
    }
    Ok(())
}

fn habits_query(model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new("habits", TypeRef::named_nn_list_nn(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let mut filter = Filter::all();
            if let Some(user_id) = ctx.args.get("userId") {
                filter = filter.and_eq("userId", user_id.string()?);
            }
            if let Some(frequency) = ctx.args.get("frequency") {
                filter = filter.and_eq("frequency", frequency.enum_name()?);
            }
            let docs = model.find_many(&filter).await?;
            Ok(Some(FieldValue::list(
                docs.into_iter().map(|d| FieldValue::value(to_graphql(d))),
            )))
        })
    })
    .argument(ArgSpec::new("userId", TypeRef::named(TypeRef::ID)))
    .argument(ArgSpec::new("frequency", TypeRef::named(FREQUENCY_TYPE)))
}

fn create_habit_mutation(
    model: Arc<dyn Model>,
    validators: ValidatorSlot,
    default_frequency: Frequency,
) -> FieldSpec {
    FieldSpec::new("createHabit", TypeRef::named_nn(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        let validators = Arc::clone(&validators);
        FieldFuture::new(async move {
            let input = ctx.args.try_get("input")?.object()?;
            let user_id = input.try_get("userId")?.string()?;
            let title = input.try_get("title")?.string()?;
            let frequency = match input.get("frequency") {
                Some(v) => {
                    let name = v.enum_name()?;
                    Frequency::parse(name)
                        .ok_or_else(|| GraphQLError::new(format!("unknown frequency '{name}'")))?
                }
                None => default_frequency,
            };

            let mut doc = Document::new();
            doc.insert("userId".into(), Json::from(user_id));
            doc.insert("title".into(), Json::from(title.trim()));
            doc.insert("frequency".into(), Json::from(frequency.as_str()));
            doc.insert("streak".into(), Json::from(0));
            run_validators(&validators, &doc)?;

            let created = model.create(doc).await?;
            Ok(Some(FieldValue::value(to_graphql(created))))
        })
    })
    .argument(ArgSpec::new("input", TypeRef::named_nn(INPUT_TYPE)))
}

fn check_in_mutation(model: Arc<dyn Model>) -> FieldSpec {
    FieldSpec::new("checkIn", TypeRef::named(TYPE_NAME), move |ctx| {
        let model = Arc::clone(&model);
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?;
            let Some(habit) = model.find_by_id(id).await? else {
                return Ok(None);
            };
            let streak = habit.get("streak").and_then(Json::as_i64).unwrap_or(0);
            let mut patch = Document::new();
            patch.insert("streak".into(), Json::from(streak + 1));
            let updated = model.update(id, patch).await?;
            Ok(updated.map(|d| FieldValue::value(to_graphql(d))))
        })
    })
    .argument(ArgSpec::new("id", TypeRef::named_nn(TypeRef::ID)))
}

async fn link_user(ctx: AppContext, habits: Arc<dyn Model>) -> anyhow::Result<()> {
    let attached = attach_relation(
        &ctx,
        &TypeResolver::for_module(user::MODULE_ID),
        user::TYPE_NAME,
        has_many("habits", TYPE_NAME, habits, "userId", "id"),
    );
    if !attached {
        warn!("User.habits not attached");
    }
    Ok(())
}

/// Registers the title validator and binds every validator the module owns.
async fn install_validators(
    ctx: AppContext,
    max_title_len: usize,
    slot: ValidatorSlot,
) -> anyhow::Result<()> {
    let mut validators = ValidatorMap::new();
    validators.insert("title".to_string(), title_validator(max_title_len));
    ctx.assets()
        .register(MODULE_ID, ModuleAssets::new().with_validators(validators))?;

    let bound: Vec<_> = ctx
        .assets()
        .get_module(MODULE_ID)
        .and_then(|assets| assets.validators)
        .map(|map| map.into_iter().collect())
        .unwrap_or_default();
    debug!(validators = bound.len(), "Habit validators bound");
    let _ = slot.set(bound);
    Ok(())
}

async fn log_ready(modules: ModuleSet, habits: Arc<dyn Model>, cfg: HabitConfig) -> anyhow::Result<()> {
    let existing = habits.find_many(&Filter::all()).await?.len();
    info!(
        modules = modules.len(),
        existing,
        default_frequency = cfg.default_frequency.as_str(),
        "Habit module initialized"
    );
    Ok(())
}

/// Factory registered for discovery.
pub fn build(ctx: &AppContext) -> anyhow::Result<ModuleDescriptor> {
    let cfg: HabitConfig = ctx.module_config(MODULE_ID)?;
    if cfg.max_title_len == 0 {
        anyhow::bail!("habit.max_title_len must be positive");
    }

    let model: Arc<dyn Model> = Arc::new(MemoryModel::new(MODEL));
    let validators: ValidatorSlot = Arc::new(OnceLock::new());

    let relation_model = Arc::clone(&model);
    let hook_slot = Arc::clone(&validators);
    let init_model = Arc::clone(&model);
    let init_cfg = cfg.clone();

    Ok(ModuleDescriptor::new(MODULE_ID)
        .with_meta(ModuleMeta {
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            description: Some("Recurring habits per user".to_string()),
            dependencies: vec![user::MODULE_ID.to_string()],
            ..ModuleMeta::default()
        })
        .with_model(MODEL, Arc::clone(&model))
        .with_type_composer("HabitFrequencyTC", frequency_type())
        .with_type_composer("HabitTC", habit_type())
        .with_type_composer("CreateHabitInputTC", create_input_type())
        .with_query(habits_query(Arc::clone(&model)))
        .with_mutation(create_habit_mutation(
            Arc::clone(&model),
            validators,
            cfg.default_frequency,
        ))
        .with_mutation(check_in_mutation(model))
        .with_default_on_load()
        .with_relations(move |ctx, _modules| link_user(ctx, Arc::clone(&relation_model)))
        .with_hooks(move |ctx, _modules| {
            install_validators(ctx, cfg.max_title_len, Arc::clone(&hook_slot))
        })
        .with_init(move |_ctx, modules| {
            log_ready(modules, Arc::clone(&init_model), init_cfg.clone())
        }))
}
