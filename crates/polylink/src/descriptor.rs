//! Relation descriptors.
//!
//! A [`Relation`] is the per-field configuration of one generic
//! many-to-many relation: the source model, the join table, the target
//! types it accepts and what happens to join rows when either endpoint is
//! deleted. Relations are declared with a [`RelationBuilder`] and owned by
//! a [`Catalog`](crate::Catalog).

use crate::registry::{TypeRegistry, TypeTag};
use polylink_core::{
    AnyModel, Error, Model, ModelInfo, Result, TableDef, TypeName, is_valid_identifier,
};
use polylink_schema::{
    DEFAULT_KEY_MAX_LENGTH, DEFAULT_MAX_NAME_LENGTH, SourceTable, ThroughSchema,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identifies a relation inside its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub usize);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relation#{}", self.0)
    }
}

/// What happens to join rows when one endpoint of a link is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Delete the join rows with the deleted object.
    #[default]
    Cascade,
    /// Leave the join rows in place.
    NoOp,
    /// Notify listeners, then delete the join rows.
    CascadeWithSignal,
    /// Notify listeners and leave the join rows in place.
    SignalOnly,
    /// Notify listeners; delete the join rows unless a listener vetoes.
    CascadeWithVetoSignal,
}

impl CascadePolicy {
    /// Does this policy notify deletion listeners?
    pub const fn emits_signal(self) -> bool {
        matches!(
            self,
            Self::CascadeWithSignal | Self::SignalOnly | Self::CascadeWithVetoSignal
        )
    }

    /// Does this policy delete join rows?
    pub const fn cascades(self) -> bool {
        matches!(
            self,
            Self::Cascade | Self::CascadeWithSignal | Self::CascadeWithVetoSignal
        )
    }

    /// Can a listener suppress the cascade?
    pub const fn vetoable(self) -> bool {
        matches!(self, Self::CascadeWithVetoSignal)
    }
}

/// A target type accepted by a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    pub tag: TypeTag,
    pub name: TypeName,
    /// Target-side policy override for this type.
    pub on_delete: Option<CascadePolicy>,
    /// Registered implicitly (by `add` on an open relation, or flagged so).
    pub auto: bool,
    /// Part of the relation's declaration, as opposed to added at runtime.
    pub declared: bool,
}

/// One declared generic relation.
pub struct Relation {
    id: RelationId,
    name: String,
    source: ModelInfo,
    through: ThroughSchema,
    open: bool,
    on_delete_src: CascadePolicy,
    on_delete_tgt: CascadePolicy,
    related_name: Option<String>,
    db_table: Option<String>,
    key_max_length: Option<u32>,
    max_name_length: usize,
    through_fields: Option<(String, String)>,
    targets: RwLock<Vec<TargetType>>,
    registry: Arc<TypeRegistry>,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("id", &self.id)
            .field("name", &self.qualified_name())
            .field("through", &self.through.name())
            .field("open", &self.open)
            .field("on_delete_src", &self.on_delete_src)
            .field("on_delete_tgt", &self.on_delete_tgt)
            .field("targets", &self.targets())
            .finish_non_exhaustive()
    }
}

impl Relation {
    fn targets_read(&self) -> RwLockReadGuard<'_, Vec<TargetType>> {
        self.targets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn targets_write(&self) -> RwLockWriteGuard<'_, Vec<TargetType>> {
        self.targets.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> RelationId {
        self.id
    }

    /// The field name on the source model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `app.Model.field`, used in errors and logs.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.source.type_name(), self.name)
    }

    pub fn source(&self) -> &ModelInfo {
        &self.source
    }

    pub fn source_type(&self) -> TypeName {
        self.source.type_name()
    }

    pub fn through(&self) -> &ThroughSchema {
        &self.through
    }

    /// Does `add` accept types that were never declared?
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn on_delete_src(&self) -> CascadePolicy {
        self.on_delete_src
    }

    pub fn on_delete_tgt(&self) -> CascadePolicy {
        self.on_delete_tgt
    }

    /// The configured related name, placeholders unexpanded.
    pub fn related_name(&self) -> Option<&str> {
        self.related_name.as_deref()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Snapshot of the accepted target types.
    pub fn targets(&self) -> Vec<TargetType> {
        self.targets_read().clone()
    }

    pub fn target(&self, tag: TypeTag) -> Option<TargetType> {
        self.targets_read().iter().find(|t| t.tag == tag).cloned()
    }

    pub fn accepts(&self, tag: TypeTag) -> bool {
        self.targets_read().iter().any(|t| t.tag == tag)
    }

    /// The target-side policy for objects of type `tag`.
    pub fn target_policy(&self, tag: TypeTag) -> CascadePolicy {
        self.targets_read()
            .iter()
            .find(|t| t.tag == tag)
            .and_then(|t| t.on_delete)
            .unwrap_or(self.on_delete_tgt)
    }

    /// Accept objects of another type. Returns its tag.
    ///
    /// Adding a type that is already accepted updates its policy override
    /// and clears its `auto` flag when `auto` is false.
    pub fn add_target_type(
        &self,
        info: ModelInfo,
        on_delete: Option<CascadePolicy>,
        auto: bool,
    ) -> TypeTag {
        self.add_target(info, on_delete, auto, false)
    }

    fn add_target(
        &self,
        info: ModelInfo,
        on_delete: Option<CascadePolicy>,
        auto: bool,
        declared: bool,
    ) -> TypeTag {
        let tag = self.registry.register_info(info);
        {
            let mut targets = self.targets_write();
            match targets.iter_mut().find(|t| t.tag == tag) {
                Some(existing) => {
                    existing.auto &= auto;
                    existing.declared |= declared;
                    if on_delete.is_some() {
                        existing.on_delete = on_delete;
                    }
                }
                None => {
                    tracing::debug!(
                        relation = %self.qualified_name(),
                        target = %info.type_name(),
                        auto,
                        "Added target type"
                    );
                    targets.push(TargetType {
                        tag,
                        name: info.type_name(),
                        on_delete,
                        auto,
                        declared,
                    });
                }
            }
        }
        self.registry.link_relation(tag, self.id);
        tag
    }

    /// The tag for a target object, accepting its type first when the
    /// relation is open.
    pub fn resolve_target(&self, object: &dyn AnyModel) -> Result<TypeTag> {
        if let Some(tag) = self.registry.tag_for(object) {
            if self.accepts(tag) {
                return Ok(tag);
            }
        }
        if !self.open {
            return Err(Error::unknown_type(
                object.model_type().to_string(),
                Some(&self.qualified_name()),
            ));
        }
        tracing::warn!(
            relation = %self.qualified_name(),
            target = %object.model_type(),
            "Implicitly registering target type on open relation"
        );
        Ok(self.add_target(object.model_info(), None, true, false))
    }

    /// Is `object` an instance of the source model?
    pub fn is_source(&self, object: &dyn AnyModel) -> bool {
        object.model_type() == self.source.type_name()
    }

    /// Fail with `UnknownType` unless `object` is a source instance.
    pub fn check_source(&self, object: &dyn AnyModel) -> Result<()> {
        if self.is_source(object) {
            Ok(())
        } else {
            Err(Error::unknown_type(
                object.model_type().to_string(),
                Some(&self.qualified_name()),
            ))
        }
    }

    /// Encode a target object's key for the target-key column.
    pub fn key_of(&self, object: &dyn AnyModel) -> Result<String> {
        self.registry
            .key_of(object, self.through.key_max_length(), &self.qualified_name())
    }

    /// Target types, excluding implicitly registered ones unless asked.
    pub fn related_models(&self, include_auto: bool) -> Vec<TypeName> {
        self.targets_read()
            .iter()
            .filter(|t| include_auto || !t.auto)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Is the reverse accessor suppressed (related name ending in `+`)?
    pub fn is_hidden(&self) -> bool {
        self.related_name.as_deref().is_some_and(|n| n.ends_with('+'))
    }

    /// The name of the reverse accessor on target types.
    ///
    /// `None` when hidden.
    pub fn accessor_name(&self) -> Option<String> {
        if self.is_hidden() {
            return None;
        }
        Some(match &self.related_name {
            Some(name) => expand_related_name(name, &self.source.type_name()),
            None => format!("{}_set", self.source.type_name().model_lower()),
        })
    }

    /// The portable description of this relation.
    ///
    /// Target types added after declaration are not part of it.
    pub fn describe(&self) -> RelationDescription {
        let targets = self
            .targets_read()
            .iter()
            .filter(|t| t.declared)
            .map(|t| TargetDescription {
                model: t.name.to_string(),
                on_delete: t.on_delete,
            })
            .collect();
        RelationDescription {
            name: self.name.clone(),
            source: self.source.type_name().to_string(),
            targets,
            open: self.open,
            on_delete_src: self.on_delete_src,
            on_delete_tgt: self.on_delete_tgt,
            related_name: self.related_name.clone(),
            db_table: self.db_table.clone(),
            key_max_length: self.key_max_length,
            max_name_length: self.max_name_length,
            through: (!self.through.is_auto_created()).then(|| self.through.table().clone()),
            through_fields: self.through_fields.clone(),
        }
    }
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{(class|app_label)\}").ok())
        .as_ref()
}

/// Expand `{class}` and `{app_label}` against the source type.
fn expand_related_name(template: &str, source: &TypeName) -> String {
    let Some(re) = placeholder_pattern() else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
        "class" => source.model_lower(),
        _ => source.app_label.to_lowercase(),
    })
    .into_owned()
}

/// Declares a relation.
///
/// # Example
///
/// ```ignore
/// let field = catalog.declare(
///     &store,
///     RelationBuilder::new::<Links>("related_objects")
///         .target::<Project>()
///         .target::<Task>()
///         .on_delete_tgt(CascadePolicy::CascadeWithVetoSignal),
/// )?;
/// ```
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    name: String,
    source: ModelInfo,
    targets: Vec<(ModelInfo, Option<CascadePolicy>)>,
    open: bool,
    on_delete: CascadePolicy,
    on_delete_src: Option<CascadePolicy>,
    on_delete_tgt: Option<CascadePolicy>,
    related_name: Option<String>,
    db_table: Option<String>,
    key_max_length: Option<u32>,
    max_name_length: usize,
    through: Option<TableDef>,
    through_fields: Option<(String, String)>,
}

impl RelationBuilder {
    /// A relation on field `name` of model `M`.
    pub fn new<M: Model>(name: impl Into<String>) -> Self {
        Self::for_source(ModelInfo::of::<M>(), name)
    }

    pub fn for_source(source: ModelInfo, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            targets: Vec::new(),
            open: true,
            on_delete: CascadePolicy::default(),
            on_delete_src: None,
            on_delete_tgt: None,
            related_name: None,
            db_table: None,
            key_max_length: None,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            through: None,
            through_fields: None,
        }
    }

    /// Accept targets of type `M`.
    #[must_use]
    pub fn target<M: Model>(self) -> Self {
        self.target_info(ModelInfo::of::<M>(), None)
    }

    /// Accept targets of type `M` with their own target-side policy.
    #[must_use]
    pub fn target_with_policy<M: Model>(self, on_delete: CascadePolicy) -> Self {
        self.target_info(ModelInfo::of::<M>(), Some(on_delete))
    }

    #[must_use]
    pub fn target_info(mut self, info: ModelInfo, on_delete: Option<CascadePolicy>) -> Self {
        let name = info.type_name();
        match self.targets.iter_mut().find(|(t, _)| t.type_name() == name) {
            Some(existing) => existing.1 = on_delete.or(existing.1),
            None => self.targets.push((info, on_delete)),
        }
        self
    }

    /// Reject target types that were not declared.
    #[must_use]
    pub const fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    /// Default policy for both sides.
    #[must_use]
    pub const fn on_delete(mut self, policy: CascadePolicy) -> Self {
        self.on_delete = policy;
        self
    }

    /// Policy when a source object is deleted.
    #[must_use]
    pub const fn on_delete_src(mut self, policy: CascadePolicy) -> Self {
        self.on_delete_src = Some(policy);
        self
    }

    /// Policy when a target object is deleted.
    #[must_use]
    pub const fn on_delete_tgt(mut self, policy: CascadePolicy) -> Self {
        self.on_delete_tgt = Some(policy);
        self
    }

    /// Name of the reverse accessor. `{class}` and `{app_label}` expand to
    /// the source model; a trailing `+` hides the accessor.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    /// Name of the generated join table.
    #[must_use]
    pub fn db_table(mut self, name: impl Into<String>) -> Self {
        self.db_table = Some(name.into());
        self
    }

    /// Width of the generated target-key column.
    #[must_use]
    pub const fn key_max_length(mut self, length: u32) -> Self {
        self.key_max_length = Some(length);
        self
    }

    /// Limit for generated table names.
    #[must_use]
    pub const fn max_name_length(mut self, length: usize) -> Self {
        self.max_name_length = length;
        self
    }

    /// Use a user-supplied join table.
    #[must_use]
    pub fn through(mut self, table: TableDef) -> Self {
        self.through = Some(table);
        self
    }

    /// Pick the source column and generic key of the join table.
    #[must_use]
    pub fn through_fields(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.through_fields = Some((source.into(), target.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ModelInfo {
        &self.source
    }

    /// Check settings that can be checked without a registry.
    pub fn validate(&self) -> Result<()> {
        let relation = format!("{}.{}", self.source.type_name(), self.name);
        if !is_valid_identifier(&self.name) {
            return Err(Error::config(format!(
                "invalid relation field name '{}'",
                self.name
            )));
        }
        if self.through.is_some() {
            if self.db_table.is_some() {
                return Err(Error::config(format!(
                    "{relation}: db_table cannot be combined with a through table"
                )));
            }
            if self.key_max_length.is_some() {
                return Err(Error::config(format!(
                    "{relation}: key_max_length cannot be combined with a through table"
                )));
            }
        } else if self.through_fields.is_some() {
            return Err(Error::config(format!(
                "{relation}: through_fields requires a through table"
            )));
        }
        if self.key_max_length == Some(0) {
            return Err(Error::config(format!(
                "{relation}: key_max_length must be positive"
            )));
        }
        if self.max_name_length < 8 {
            return Err(Error::config(format!(
                "{relation}: max_name_length {} is too small",
                self.max_name_length
            )));
        }
        if let Some(table) = &self.db_table {
            if !is_valid_identifier(table) {
                return Err(Error::config(format!(
                    "{relation}: invalid db_table '{table}'"
                )));
            }
        }
        if let Some(related) = &self.related_name {
            let expanded = expand_related_name(related, &self.source.type_name());
            let accessor = expanded.trim_end_matches('+');
            if !accessor.is_empty() && !is_valid_identifier(accessor) {
                return Err(Error::config(format!(
                    "{relation}: invalid related_name '{related}'"
                )));
            }
        }
        if !self.open && self.targets.is_empty() {
            return Err(Error::config(format!(
                "{relation}: closed relation declares no target types"
            )));
        }
        Ok(())
    }

    /// Build the relation, registering its target types.
    pub(crate) fn build(self, id: RelationId, registry: Arc<TypeRegistry>) -> Result<Relation> {
        self.validate()?;

        let through = match &self.through {
            Some(table) => {
                let fields = self
                    .through_fields
                    .as_ref()
                    .map(|(src, tgt)| (src.as_str(), tgt.as_str()));
                ThroughSchema::from_table(table.clone(), self.source.table, fields)?
            }
            None => ThroughSchema::auto(
                SourceTable {
                    table: self.source.table,
                    primary_key: self.source.primary_key,
                    key_kind: self.source.key_kind,
                },
                &self.name,
                self.db_table.as_deref(),
                self.key_max_length.unwrap_or(DEFAULT_KEY_MAX_LENGTH),
                self.max_name_length,
            ),
        };

        let relation = Relation {
            id,
            name: self.name,
            source: self.source,
            through,
            open: self.open,
            on_delete_src: self.on_delete_src.unwrap_or(self.on_delete),
            on_delete_tgt: self.on_delete_tgt.unwrap_or(self.on_delete),
            related_name: self.related_name,
            db_table: self.db_table,
            key_max_length: self.key_max_length,
            max_name_length: self.max_name_length,
            through_fields: self.through_fields,
            targets: RwLock::new(Vec::new()),
            registry,
        };
        for (info, on_delete) in self.targets {
            relation.add_target(info, on_delete, false, true);
        }
        Ok(relation)
    }

    /// Rebuild a declaration from its description.
    ///
    /// The source and every target type must already be registered in
    /// `registry`, since a description only carries their names.
    pub fn from_description(
        description: &RelationDescription,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let lookup = |name: &str| -> Result<ModelInfo> {
            TypeName::parse(name)
                .and_then(|n| registry.entry_by_name(&n))
                .map(|entry| entry.info)
                .ok_or_else(|| Error::unknown_type(name, None))
        };

        let mut builder = Self::for_source(lookup(&description.source)?, &description.name)
            .on_delete_src(description.on_delete_src)
            .on_delete_tgt(description.on_delete_tgt)
            .max_name_length(description.max_name_length);
        builder.open = description.open;
        for target in &description.targets {
            builder = builder.target_info(lookup(&target.model)?, target.on_delete);
        }
        builder.related_name.clone_from(&description.related_name);
        builder.db_table.clone_from(&description.db_table);
        builder.key_max_length = description.key_max_length;
        builder.through.clone_from(&description.through);
        builder.through_fields.clone_from(&description.through_fields);
        Ok(builder)
    }
}

/// A target type in a [`RelationDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescription {
    /// `app.Model`
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<CascadePolicy>,
}

/// The portable form of a relation declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescription {
    pub name: String,
    /// `app.Model`
    pub source: String,
    pub targets: Vec<TargetDescription>,
    #[serde(default = "default_open")]
    pub open: bool,
    #[serde(default)]
    pub on_delete_src: CascadePolicy,
    #[serde(default)]
    pub on_delete_tgt: CascadePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_max_length: Option<u32>,
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<TableDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through_fields: Option<(String, String)>,
}

const fn default_open() -> bool {
    true
}

const fn default_max_name_length() -> usize {
    DEFAULT_MAX_NAME_LENGTH
}

impl RelationDescription {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
