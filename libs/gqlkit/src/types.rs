//! Type composers: shared, mutable builders for a single GraphQL type.
//!
//! A [`TypeComposer`] is a cheap-clone handle. Every clone points at the same
//! [`ComposedType`], so a field added by one module's relation step is visible
//! through the copy held by the owning module, the asset registry and the
//! schema namespace alike. The variant (object/input/scalar/enum) is fixed when
//! the composer is created and never inferred later.

use std::fmt;
use std::sync::Arc;

use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, InputObject, InputValue, Object, ResolverContext, Scalar,
    Type, TypeRef,
};
use async_graphql::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

/// Resolve function attached to an output field.
pub type FieldResolver =
    Arc<dyn for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync>;

/// Scalar input/output validator.
pub type ScalarValidator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Object,
    Input,
    Scalar,
    Enum,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeKind::Object => "object",
            TypeKind::Input => "input",
            TypeKind::Scalar => "scalar",
            TypeKind::Enum => "enum",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("type '{type_name}' is a {kind} type and has no output fields")]
    NotAnObject { type_name: String, kind: TypeKind },
    #[error("type '{type_name}' is a {kind} type and has no input fields")]
    NotAnInput { type_name: String, kind: TypeKind },
}

/// An argument of an output field, or a field of an input object.
#[derive(Clone, Debug)]
pub struct ArgSpec {
    pub name: String,
    pub ty: TypeRef,
    pub description: Option<String>,
    pub default_value: Option<Value>,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            description: None,
            default_value: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    fn to_dynamic(&self) -> InputValue {
        let mut input = InputValue::new(self.name.as_str(), self.ty.clone());
        if let Some(description) = &self.description {
            input = input.description(description.as_str());
        }
        if let Some(value) = &self.default_value {
            input = input.default_value(value.clone());
        }
        input
    }
}

/// An output field: type, arguments and the function that resolves it.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeRef,
    pub args: Vec<ArgSpec>,
    pub description: Option<String>,
    pub deprecation: Option<String>,
    pub resolver: FieldResolver,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("ty", &self.ty.to_string())
            .field("args", &self.args.iter().map(|a| &a.name).collect::<Vec<_>>())
            .finish()
    }
}

impl FieldSpec {
    pub fn new<F>(name: impl Into<String>, ty: impl Into<TypeRef>, resolver: F) -> Self
    where
        F: for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ty: ty.into(),
            args: Vec::new(),
            description: None,
            deprecation: None,
            resolver: Arc::new(resolver),
        }
    }

    /// Field that returns the parent object's value under the same key.
    pub fn property(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        let name = name.into();
        let key = name.clone();
        Self::new(name, ty, move |ctx| {
            let value = parent_value(&ctx, &key);
            FieldFuture::new(async move { Ok(value) })
        })
    }

    /// Field that reads `key` from the parent object and exposes it as an enum item.
    pub fn enum_property(name: impl Into<String>, enum_type: &str) -> Self {
        let name = name.into();
        let key = name.clone();
        Self::new(name, TypeRef::named(enum_type), move |ctx| {
            let value = parent_value(&ctx, &key).and_then(|v| match v {
                Value::String(s) => Some(Value::Enum(async_graphql::Name::new(s))),
                Value::Enum(n) => Some(Value::Enum(n)),
                _ => None,
            });
            FieldFuture::new(async move { Ok(value) })
        })
    }

    pub fn argument(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn deprecated(mut self, reason: impl Into<String>) -> Self {
        self.deprecation = Some(reason.into());
        self
    }

    fn to_dynamic(&self) -> Field {
        let resolver = Arc::clone(&self.resolver);
        let mut field = Field::new(self.name.as_str(), self.ty.clone(), move |ctx| resolver(ctx));
        for arg in &self.args {
            field = field.argument(arg.to_dynamic());
        }
        if let Some(description) = &self.description {
            field = field.description(description.as_str());
        }
        if let Some(reason) = &self.deprecation {
            field = field.deprecation(Some(reason.as_str()));
        }
        field
    }
}

/// Reads `key` from the parent object value of a resolver, if the parent is an object.
pub fn parent_value(ctx: &ResolverContext<'_>, key: &str) -> Option<Value> {
    match ctx.parent_value.as_value() {
        Some(Value::Object(map)) => map.get(key).filter(|v| !matches!(v, Value::Null)).cloned(),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct ObjectType {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldSpec>,
}

#[derive(Clone, Debug)]
pub struct InputType {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, ArgSpec>,
}

#[derive(Clone)]
pub struct ScalarType {
    pub name: String,
    pub description: Option<String>,
    pub validator: Option<ScalarValidator>,
}

impl fmt::Debug for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarType")
            .field("name", &self.name)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct EnumType {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<String>,
}

/// The composed type behind a [`TypeComposer`], tagged by kind.
#[derive(Clone, Debug)]
pub enum ComposedType {
    Object(ObjectType),
    Input(InputType),
    Scalar(ScalarType),
    Enum(EnumType),
}

impl ComposedType {
    pub fn name(&self) -> &str {
        match self {
            ComposedType::Object(t) => &t.name,
            ComposedType::Input(t) => &t.name,
            ComposedType::Scalar(t) => &t.name,
            ComposedType::Enum(t) => &t.name,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            ComposedType::Object(_) => TypeKind::Object,
            ComposedType::Input(_) => TypeKind::Input,
            ComposedType::Scalar(_) => TypeKind::Scalar,
            ComposedType::Enum(_) => TypeKind::Enum,
        }
    }

    fn description_mut(&mut self) -> &mut Option<String> {
        match self {
            ComposedType::Object(t) => &mut t.description,
            ComposedType::Input(t) => &mut t.description,
            ComposedType::Scalar(t) => &mut t.description,
            ComposedType::Enum(t) => &mut t.description,
        }
    }

    /// Lower into the async-graphql dynamic type registered with the schema builder.
    pub fn to_dynamic(&self) -> Type {
        match self {
            ComposedType::Object(t) => {
                let mut object = Object::new(t.name.as_str());
                if let Some(d) = &t.description {
                    object = object.description(d.as_str());
                }
                for field in t.fields.values() {
                    object = object.field(field.to_dynamic());
                }
                object.into()
            }
            ComposedType::Input(t) => {
                let mut input = InputObject::new(t.name.as_str());
                if let Some(d) = &t.description {
                    input = input.description(d.as_str());
                }
                for field in t.fields.values() {
                    input = input.field(field.to_dynamic());
                }
                input.into()
            }
            ComposedType::Scalar(t) => {
                let mut scalar = Scalar::new(t.name.as_str());
                if let Some(d) = &t.description {
                    scalar = scalar.description(d.as_str());
                }
                if let Some(validator) = &t.validator {
                    let validator = Arc::clone(validator);
                    scalar = scalar.validator(move |value| validator(value));
                }
                scalar.into()
            }
            ComposedType::Enum(t) => {
                let mut enumeration = Enum::new(t.name.as_str());
                if let Some(d) = &t.description {
                    enumeration = enumeration.description(d.as_str());
                }
                for value in &t.values {
                    enumeration = enumeration.item(EnumItem::new(value.as_str()));
                }
                enumeration.into()
            }
        }
    }
}

/// Shared handle to a [`ComposedType`].
#[derive(Clone)]
pub struct TypeComposer(Arc<RwLock<ComposedType>>);

impl fmt::Debug for TypeComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.read();
        f.debug_struct("TypeComposer")
            .field("name", &inner.name())
            .field("kind", &inner.kind())
            .finish()
    }
}

impl TypeComposer {
    fn from_type(ty: ComposedType) -> Self {
        Self(Arc::new(RwLock::new(ty)))
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::from_type(ComposedType::Object(ObjectType {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }))
    }

    pub fn input(name: impl Into<String>) -> Self {
        Self::from_type(ComposedType::Input(InputType {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }))
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::from_type(ComposedType::Scalar(ScalarType {
            name: name.into(),
            description: None,
            validator: None,
        }))
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_type(ComposedType::Enum(EnumType {
            name: name.into(),
            description: None,
            values: values.into_iter().map(Into::into).collect(),
        }))
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        *self.0.write().description_mut() = Some(description.into());
        self
    }

    /// Attach a validator to a scalar composer. No-op for other kinds.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        if let ComposedType::Scalar(s) = &mut *self.0.write() {
            s.validator = Some(Arc::new(validator));
        }
        self
    }

    /// Builder-style [`TypeComposer::add_field`] for freshly created object composers.
    pub fn with_field(self, field: FieldSpec) -> Self {
        if let Err(e) = self.add_field(field) {
            tracing::warn!(error = %e, "Ignoring field on non-object type");
        }
        self
    }

    /// Builder-style [`TypeComposer::add_input_field`].
    pub fn with_input_field(self, field: ArgSpec) -> Self {
        if let Err(e) = self.add_input_field(field) {
            tracing::warn!(error = %e, "Ignoring input field on non-input type");
        }
        self
    }

    pub fn name(&self) -> String {
        self.0.read().name().to_string()
    }

    pub fn kind(&self) -> TypeKind {
        self.0.read().kind()
    }

    pub fn is_object(&self) -> bool {
        self.kind() == TypeKind::Object
    }

    /// Adds or replaces an output field.
    pub fn add_field(&self, field: FieldSpec) -> Result<(), TypeError> {
        let mut inner = self.0.write();
        match &mut *inner {
            ComposedType::Object(object) => {
                if object.fields.contains_key(&field.name) {
                    tracing::debug!(type_name = %object.name, field = %field.name, "Replacing existing field");
                }
                object.fields.insert(field.name.clone(), field);
                Ok(())
            }
            other => Err(TypeError::NotAnObject {
                type_name: other.name().to_string(),
                kind: other.kind(),
            }),
        }
    }

    /// Adds the field only if no field with that name exists. Returns whether it was added.
    pub fn add_field_if_absent(&self, field: FieldSpec) -> Result<bool, TypeError> {
        let mut inner = self.0.write();
        match &mut *inner {
            ComposedType::Object(object) => {
                if object.fields.contains_key(&field.name) {
                    return Ok(false);
                }
                object.fields.insert(field.name.clone(), field);
                Ok(true)
            }
            other => Err(TypeError::NotAnObject {
                type_name: other.name().to_string(),
                kind: other.kind(),
            }),
        }
    }

    pub fn add_fields<I>(&self, fields: I) -> Result<(), TypeError>
    where
        I: IntoIterator<Item = FieldSpec>,
    {
        for field in fields {
            self.add_field(field)?;
        }
        Ok(())
    }

    pub fn add_input_field(&self, field: ArgSpec) -> Result<(), TypeError> {
        let mut inner = self.0.write();
        match &mut *inner {
            ComposedType::Input(input) => {
                input.fields.insert(field.name.clone(), field);
                Ok(())
            }
            other => Err(TypeError::NotAnInput {
                type_name: other.name().to_string(),
                kind: other.kind(),
            }),
        }
    }

    pub fn remove_field(&self, name: &str) -> bool {
        match &mut *self.0.write() {
            ComposedType::Object(o) => o.fields.shift_remove(name).is_some(),
            ComposedType::Input(i) => i.fields.shift_remove(name).is_some(),
            _ => false,
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        match &*self.0.read() {
            ComposedType::Object(o) => o.fields.contains_key(name),
            ComposedType::Input(i) => i.fields.contains_key(name),
            _ => false,
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        match &*self.0.read() {
            ComposedType::Object(o) => o.fields.keys().cloned().collect(),
            ComposedType::Input(i) => i.fields.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn field_count(&self) -> usize {
        match &*self.0.read() {
            ComposedType::Object(o) => o.fields.len(),
            ComposedType::Input(i) => i.fields.len(),
            _ => 0,
        }
    }

    pub fn enum_values(&self) -> Option<Vec<String>> {
        match &*self.0.read() {
            ComposedType::Enum(e) => Some(e.values.clone()),
            _ => None,
        }
    }

    /// Runs `f` against the object variant. Returns `None` for any other kind.
    pub fn with_object_mut<R>(&self, f: impl FnOnce(&mut ObjectType) -> R) -> Option<R> {
        match &mut *self.0.write() {
            ComposedType::Object(o) => Some(f(o)),
            _ => None,
        }
    }

    /// Snapshot of the composed type.
    pub fn snapshot(&self) -> ComposedType {
        self.0.read().clone()
    }

    pub fn to_dynamic(&self) -> Type {
        self.0.read().to_dynamic()
    }

    /// Whether both handles point at the same composed type.
    pub fn ptr_eq(&self, other: &TypeComposer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
